//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Where and how to reach the mailbox. Read-only once built; shared by
/// every worker.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Markers used to pull amounts out of a message body.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    /// Text contained in the label cell preceding the tax amount.
    pub tax_marker: String,
    /// Class carried by the cell holding the tax amount.
    pub value_class: String,
    /// Class carried by the cell holding the total charge.
    pub total_class: String,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            tax_marker: "GST".to_string(),
            value_class: "value".to_string(),
            total_class: "charge-total".to_string(),
        }
    }
}

/// Converter configuration.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Product label placed in every output file name.
    pub label: String,
    /// Directory receiving the PDFs and the naming lock.
    pub output_dir: PathBuf,
    /// How long the coordinator waits on a single message task.
    pub task_timeout: Duration,
    /// Upper bound on concurrent workers (defaults to available parallelism).
    pub max_workers: Option<usize>,
    pub extraction: ExtractionRules,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            label: "Lyft".to_string(),
            output_dir: PathBuf::from("."),
            task_timeout: Duration::from_secs(60),
            max_workers: None,
            extraction: ExtractionRules::default(),
        }
    }
}

impl ConverterConfig {
    /// Number of workers for `tasks` messages: min(parallelism, tasks), at least 1.
    pub fn pool_size(&self, tasks: usize) -> usize {
        let available = self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        available.min(tasks).max(1)
    }
}
