//! One message, end to end: fetch → parse → render → name → write.
//!
//! Blocking; the coordinator runs it on a blocking thread. Each run opens
//! and releases its own mailbox session.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::TaskError;
use crate::mailbox::{Mailbox, MessageId, SessionGuard};
use crate::naming::NameArbiter;
use crate::parser::EmailParser;
use crate::pipeline::types::{OutputRecord, TaskState};
use crate::render::Renderer;

/// Read-only collaborators shared by every worker.
pub struct WorkerDeps {
    pub mailbox: Arc<dyn Mailbox>,
    pub parser: EmailParser,
    pub renderer: Renderer,
    pub arbiter: NameArbiter,
}

/// Tracks a task through its states, logging each transition.
struct TaskTracker<'a> {
    id: &'a MessageId,
    state: TaskState,
}

impl<'a> TaskTracker<'a> {
    fn new(id: &'a MessageId) -> Self {
        Self {
            id,
            state: TaskState::Pending,
        }
    }

    fn advance(&mut self, target: TaskState) {
        if !self.state.can_transition_to(target) {
            warn!(id = %self.id, from = %self.state, to = %target, "Invalid task transition");
            return;
        }
        debug!(id = %self.id, from = %self.state, to = %target, "Task transition");
        self.state = target;
    }
}

/// Run one task to completion and describe how it ended.
pub fn run_task(id: MessageId, deps: &WorkerDeps) -> OutputRecord {
    let mut tracker = TaskTracker::new(&id);
    let result = execute(&id, deps, &mut tracker);

    match result {
        Ok(path) => {
            tracker.advance(TaskState::Done);
            OutputRecord::success(id, path)
        }
        Err(e) => {
            error!(id = %id, stage = %tracker.state, error = %e, "Task failed");
            tracker.advance(TaskState::Failed);
            OutputRecord::failure(id, &e)
        }
    }
}

fn execute(
    id: &MessageId,
    deps: &WorkerDeps,
    tracker: &mut TaskTracker<'_>,
) -> Result<PathBuf, TaskError> {
    tracker.advance(TaskState::Fetching);
    let mut session = SessionGuard::open(deps.mailbox.as_ref())?;
    let raw = session.fetch(id)?;

    tracker.advance(TaskState::Parsing);
    let parsed = deps.parser.parse(&raw)?;
    drop(raw);

    tracker.advance(TaskState::Rendering);
    let document = deps.renderer.render(&parsed)?;

    tracker.advance(TaskState::Naming);
    let reservation = deps.arbiter.reserve_unique(&document.base_name)?;
    let path = reservation.write(&document.bytes)?;

    Ok(path)
}
