//! Error types for email-to-pdf.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type for a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// Remote mailbox errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Could not connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch of message {id} failed: {reason}")]
    Fetch { id: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),
}

/// Message decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Message could not be decoded")]
    Undecodable,

    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid date header: {0}")]
    InvalidDate(String),

    #[error("No HTML or plain-text body part")]
    NoBody,
}

/// Document rendering errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Rendering engine failed: {0}")]
    Engine(String),

    #[error("Rendering engine produced an empty document")]
    Empty,
}

/// Output naming errors.
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error("No free file name for \"{base}\" after {probes} attempts")]
    Exhausted { base: String, probes: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that can end a single message task unsuccessfully.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Mailbox(#[from] MailboxError),

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Render(#[from] RenderError),

    #[error("{0}")]
    Naming(#[from] NamingError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker panicked: {0}")]
    Panicked(String),
}

/// Coarse failure category reported for each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    ConnectionError,
    SearchError,
    FetchError,
    ParseError,
    RenderError,
    NamingError,
    Timeout,
    Panicked,
}

impl TaskError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Mailbox(MailboxError::Connection { .. }) => FailureKind::ConnectionError,
            Self::Mailbox(MailboxError::Search(_)) => FailureKind::SearchError,
            Self::Mailbox(MailboxError::Fetch { .. } | MailboxError::Protocol(_)) => {
                FailureKind::FetchError
            }
            Self::Parse(_) => FailureKind::ParseError,
            Self::Render(_) => FailureKind::RenderError,
            Self::Naming(_) => FailureKind::NamingError,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Panicked(_) => FailureKind::Panicked,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionError => "ConnectionError",
            Self::SearchError => "SearchError",
            Self::FetchError => "FetchError",
            Self::ParseError => "ParseError",
            Self::RenderError => "RenderError",
            Self::NamingError => "NamingError",
            Self::Timeout => "Timeout",
            Self::Panicked => "Panicked",
        };
        write!(f, "{s}")
    }
}

/// Result type alias for a run.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_kinds() {
        let err = TaskError::from(MailboxError::Fetch {
            id: "7".into(),
            reason: "no payload".into(),
        });
        assert_eq!(err.kind(), FailureKind::FetchError);

        let err = TaskError::from(MailboxError::Connection {
            host: "imap.test".into(),
            reason: "refused".into(),
        });
        assert_eq!(err.kind(), FailureKind::ConnectionError);

        assert_eq!(
            TaskError::Timeout(Duration::from_secs(60)).kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            TaskError::from(RenderError::Empty).kind(),
            FailureKind::RenderError
        );
    }

    #[test]
    fn task_error_message_is_unwrapped() {
        let err = TaskError::from(ParseError::MissingHeader("Subject"));
        assert_eq!(err.to_string(), "Missing required header: Subject");
    }
}
