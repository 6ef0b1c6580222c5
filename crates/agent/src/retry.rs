//! Replay of failed mutating requests.
//!
//! Tasks live in the `retry_tasks` table and are removed only after a replay
//! reaches the server. A replay that gets no response, or a 5xx, leaves the
//! task exactly as it was for the next trigger.

use harrow_client::Transport;
use harrow_core::{AgentRequest, CacheDb, Error, RetryTask};
use serde::Serialize;

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Delivered and removed.
    pub replayed: usize,
    /// Failed again, or delivered but not removed; still queued.
    pub retained: usize,
    /// Malformed; left in place untouched.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct RetryQueue {
    db: CacheDb,
}

impl RetryQueue {
    pub fn new(db: CacheDb) -> Self {
        Self { db }
    }

    /// Append a mutating request. GET requests are cached, never queued.
    pub async fn enqueue(&self, request: &AgentRequest) -> Result<RetryTask, Error> {
        if request.is_get() {
            return Err(Error::InvalidInput(format!("GET {} cannot be queued for retry", request.url)));
        }

        let task = RetryTask::from_request(request);
        self.db.enqueue_retry(&task).await?;
        tracing::info!(id = %task.id, method = %task.method, url = %task.url, "queued request for retry");
        Ok(task)
    }

    pub async fn pending(&self) -> Result<Vec<RetryTask>, Error> {
        self.db.list_retry_tasks().await
    }

    /// Replay every queued task once, sequentially, in insertion order.
    ///
    /// Safe to run while another pass is in flight: a task delivered twice
    /// is removed once, which is at-least-once delivery.
    pub async fn replay(&self, transport: &dyn Transport) -> Result<ReplayReport, Error> {
        let total = self.db.count_retry_tasks().await?;
        let tasks = self.pending().await?;
        let mut report = ReplayReport { skipped: (total as usize).saturating_sub(tasks.len()), ..Default::default() };

        for task in tasks {
            let request = match task.to_request() {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(id = %task.id, error = %e, "skipping malformed retry task");
                    report.skipped += 1;
                    continue;
                }
            };

            match transport.send(&request).await {
                Ok(response) if response.status < 500 => match self.db.remove_retry_task(&task.id).await {
                    Ok(_) => {
                        tracing::info!(id = %task.id, status = response.status, "retry task delivered");
                        report.replayed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(id = %task.id, error = %e, "retry task delivered but could not be removed, keeping it");
                        report.retained += 1;
                    }
                },
                Ok(response) => {
                    tracing::warn!(id = %task.id, status = response.status, "retry task rejected by server, keeping it");
                    report.retained += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %task.id, error = %e, "retry task failed, keeping it");
                    report.retained += 1;
                }
            }
        }

        tracing::info!(replayed = report.replayed, retained = report.retained, skipped = report.skipped, "replay finished");
        Ok(report)
    }
}
