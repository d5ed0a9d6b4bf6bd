//! Concurrent conversion pipeline.
//!
//! Every matching message flows through:
//! 1. `Mailbox::connect()` + `fetch()`: a private session per worker
//! 2. `EmailParser::parse()`: headers, body, amounts
//! 3. `Renderer::render()`: template → PDF bytes
//! 4. `NameArbiter::reserve_unique()`: collision-free output path
//!
//! The `Coordinator` searches once, runs one task per match on a bounded
//! worker pool and reports one `OutputRecord` per match.

pub mod coordinator;
pub mod task;
pub mod types;

pub use coordinator::Coordinator;
pub use task::{WorkerDeps, run_task};
pub use types::{Outcome, OutputRecord, RunReport, TaskState};
