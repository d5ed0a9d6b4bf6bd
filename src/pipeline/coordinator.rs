//! Search once, fan out one task per match, collect one record per match.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ConverterConfig;
use crate::error::{MailboxError, Result, TaskError};
use crate::mailbox::{Mailbox, MessageId, SearchCriteria, SessionGuard};
use crate::naming::NameArbiter;
use crate::parser::EmailParser;
use crate::pipeline::task::{WorkerDeps, run_task};
use crate::pipeline::types::{OutputRecord, RunReport};
use crate::render::{RenderEngine, Renderer};

/// Drives a whole conversion run.
pub struct Coordinator {
    mailbox: Arc<dyn Mailbox>,
    engine: Arc<dyn RenderEngine>,
    config: ConverterConfig,
}

impl Coordinator {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        engine: Arc<dyn RenderEngine>,
        config: ConverterConfig,
    ) -> Self {
        Self {
            mailbox,
            engine,
            config,
        }
    }

    /// Process every message matching `criteria`.
    ///
    /// `on_result` sees each record as soon as its task resolves. Per-message
    /// failures end up in the report; only a failed search is returned as an
    /// error. Timed-out tasks are abandoned, not cancelled.
    pub async fn run<F>(&self, criteria: &SearchCriteria, mut on_result: F) -> Result<RunReport>
    where
        F: FnMut(&OutputRecord),
    {
        let ids = self.search(criteria).await?;
        if ids.is_empty() {
            info!(sender = %criteria.sender, subject = %criteria.subject, "No matching emails found");
            return Ok(RunReport::no_matches());
        }

        let workers = self.config.pool_size(ids.len());
        info!(messages = ids.len(), workers, "Processing matching emails");

        let deps = Arc::new(WorkerDeps {
            mailbox: Arc::clone(&self.mailbox),
            parser: EmailParser::new(self.config.extraction.clone()),
            renderer: Renderer::new(Arc::clone(&self.engine), self.config.label.clone()),
            arbiter: NameArbiter::new(self.config.output_dir.clone()),
        });
        let permits = Arc::new(Semaphore::new(workers));

        let mut tasks = JoinSet::new();
        let mut pending = HashMap::with_capacity(ids.len());
        for id in ids {
            let handle = tasks.spawn(supervise(
                id.clone(),
                Arc::clone(&deps),
                Arc::clone(&permits),
                self.config.task_timeout,
            ));
            pending.insert(handle.id(), id);
        }

        let mut records = Vec::with_capacity(pending.len());
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);
        let mut interrupted = false;

        loop {
            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    let record = match joined {
                        Some(Ok((task_id, record))) => {
                            pending.remove(&task_id);
                            record
                        }
                        Some(Err(e)) => {
                            let Some(id) = pending.remove(&e.id()) else {
                                error!("Supervisor for unknown task failed: {e}");
                                continue;
                            };
                            OutputRecord::failure(id, &TaskError::Panicked(e.to_string()))
                        }
                        None => break,
                    };
                    on_result(&record);
                    records.push(record);
                }
                signal = &mut interrupt, if !interrupted => {
                    interrupted = true;
                    match signal {
                        Ok(()) => warn!(
                            remaining = pending.len(),
                            "Interrupt received; letting in-flight tasks finish or time out"
                        ),
                        Err(e) => warn!("Could not listen for interrupts: {e}"),
                    }
                }
            }
        }

        let report = RunReport {
            no_matches: false,
            records,
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Run finished"
        );
        Ok(report)
    }

    /// One session, one search. Duplicate identifiers are dropped so every
    /// message is attempted once.
    async fn search(
        &self,
        criteria: &SearchCriteria,
    ) -> std::result::Result<Vec<MessageId>, MailboxError> {
        let mailbox = Arc::clone(&self.mailbox);
        let criteria = criteria.clone();

        let ids = tokio::task::spawn_blocking(move || {
            let mut session = SessionGuard::open(mailbox.as_ref())?;
            session.search(&criteria)
        })
        .await
        .map_err(|e| MailboxError::Search(format!("search task panicked: {e}")))??;

        let mut seen = HashSet::new();
        Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
    }
}

/// Wait for a worker slot, run the task on a blocking thread, and stop
/// waiting after `timeout`. The slot stays taken until the work really ends.
async fn supervise(
    id: MessageId,
    deps: Arc<WorkerDeps>,
    permits: Arc<Semaphore>,
    timeout: Duration,
) -> OutputRecord {
    let permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => return OutputRecord::failure(id, &TaskError::Panicked(e.to_string())),
    };

    let worker_id = id.clone();
    let work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        run_task(worker_id, &deps)
    });

    match tokio::time::timeout(timeout, work).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            error!(id = %id, "Worker panicked: {e}");
            OutputRecord::failure(id, &TaskError::Panicked(e.to_string()))
        }
        Err(_) => {
            warn!(id = %id, ?timeout, "Task timed out; abandoning it");
            OutputRecord::failure(id, &TaskError::Timeout(timeout))
        }
    }
}
