//! Pipeline types: per-task state machine, task outcomes and the run report.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{FailureKind, TaskError};
use crate::mailbox::MessageId;

/// State of one message task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker.
    Pending,
    /// Opening a session and downloading the message.
    Fetching,
    Parsing,
    Rendering,
    /// Reserving the output name and writing the document.
    Naming,
    /// Document written.
    Done,
    /// Task ended with an error.
    Failed,
}

impl TaskState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        if target == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Pending, Fetching)
                | (Fetching, Parsing)
                | (Parsing, Rendering)
                | (Rendering, Naming)
                | (Naming, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Rendering => "rendering",
            Self::Naming => "naming",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { kind: FailureKind, reason: String },
}

/// Result of one message task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub identifier: MessageId,
    pub final_path: Option<PathBuf>,
    pub outcome: Outcome,
}

impl OutputRecord {
    pub fn success(identifier: MessageId, final_path: PathBuf) -> Self {
        Self {
            identifier,
            final_path: Some(final_path),
            outcome: Outcome::Success,
        }
    }

    pub fn failure(identifier: MessageId, error: &TaskError) -> Self {
        Self {
            identifier,
            final_path: None,
            outcome: Outcome::Failure {
                kind: error.kind(),
                reason: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// One user-facing line: `Created <path>` or `Error processing <id>: <reason>`.
    pub fn report_line(&self) -> String {
        match (&self.outcome, &self.final_path) {
            (Outcome::Success, Some(path)) => format!("Created {}", path.display()),
            (Outcome::Success, None) => format!("Created document for {}", self.identifier),
            (Outcome::Failure { kind, reason }, _) => {
                format!("Error processing {}: {kind}: {reason}", self.identifier)
            }
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// The search matched nothing; no tasks were started.
    pub no_matches: bool,
    pub records: Vec<OutputRecord>,
}

impl RunReport {
    pub fn no_matches() -> Self {
        Self {
            no_matches: true,
            records: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }

    pub fn summary(&self) -> String {
        if self.no_matches {
            return "No matching emails found".to_string();
        }
        format!(
            "Processed {} email(s): {} created, {} failed",
            self.records.len(),
            self.succeeded(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::MailboxError;

    #[test]
    fn happy_path_transitions() {
        use TaskState::*;
        let path = [Pending, Fetching, Parsing, Rendering, Naming, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn any_active_state_can_fail() {
        use TaskState::*;
        for state in [Pending, Fetching, Parsing, Rendering, Naming] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn no_skipping_or_going_back() {
        use TaskState::*;
        assert!(!Pending.can_transition_to(Parsing));
        assert!(!Rendering.can_transition_to(Fetching));
        assert!(!Failed.can_transition_to(Pending));
        assert!(Done.is_terminal());
    }

    #[test]
    fn report_lines() {
        let ok = OutputRecord::success(MessageId::new("3"), PathBuf::from("20240305 - Lyft.pdf"));
        assert_eq!(ok.report_line(), "Created 20240305 - Lyft.pdf");

        let err = TaskError::from(MailboxError::Fetch {
            id: "4".into(),
            reason: "no payload".into(),
        });
        let failed = OutputRecord::failure(MessageId::new("4"), &err);
        assert_eq!(
            failed.report_line(),
            "Error processing 4: FetchError: Fetch of message 4 failed: no payload"
        );
        assert_eq!(failed.failure_kind(), Some(FailureKind::FetchError));
    }

    #[test]
    fn report_counts() {
        let report = RunReport {
            no_matches: false,
            records: vec![
                OutputRecord::success(MessageId::new("1"), PathBuf::from("a.pdf")),
                OutputRecord::failure(
                    MessageId::new("2"),
                    &TaskError::Timeout(Duration::from_secs(60)),
                ),
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.summary(), "Processed 2 email(s): 1 created, 1 failed");
        assert_eq!(RunReport::no_matches().summary(), "No matching emails found");
    }

    #[test]
    fn record_serializes_with_status_tag() {
        let record = OutputRecord::failure(
            MessageId::new("9"),
            &TaskError::Timeout(Duration::from_secs(1)),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["identifier"], "9");
        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["kind"], "Timeout");
    }
}
