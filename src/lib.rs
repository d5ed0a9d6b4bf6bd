//! email-to-pdf: turn matching mailbox messages into PDF documents.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod naming;
pub mod parser;
pub mod pipeline;
pub mod render;
