//! Age-based eviction.
//!
//! [`sweep`] deletes every entry older than the retention window from every
//! store. [`EvictionHandle`] runs it on an interval until stopped; dropping
//! the handle also stops the task.

use std::time::Duration;

use chrono::{DateTime, Utc};
use harrow_core::{CacheDb, Error, StoreHandle};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stores: usize,
    pub evicted: u64,
    /// Stores whose sweep failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Delete entries whose age at `now` exceeds `retention`, across all stores.
///
/// A failing store is recorded and skipped.
pub async fn sweep(db: &CacheDb, now: DateTime<Utc>, retention: chrono::Duration) -> Result<SweepReport, Error> {
    let cutoff = now - retention;
    let mut report = SweepReport::default();

    for name in db.list_store_names().await? {
        report.stores += 1;
        match db.evict_older_than(&StoreHandle::named(name.as_str()), cutoff).await {
            Ok(0) => {}
            Ok(count) => {
                tracing::debug!(store = %name, count, "evicted expired entries");
                report.evicted += count;
            }
            Err(e) => {
                tracing::warn!(store = %name, error = %e, "eviction failed for store");
                report.failed.push((name, e.to_string()));
            }
        }
    }

    tracing::info!(stores = report.stores, evicted = report.evicted, "eviction sweep finished");
    Ok(report)
}

/// A running eviction timer.
pub struct EvictionHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EvictionHandle {
    /// Start sweeping every `interval`. The first sweep runs immediately.
    pub fn spawn(db: CacheDb, interval: Duration, retention: chrono::Duration) -> Self {
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(e) = sweep(&db, Utc::now(), retention).await {
                            tracing::warn!(error = %e, "scheduled eviction sweep failed");
                        }
                    }
                }
            }

            tracing::debug!("eviction scheduler stopped");
        });

        Self { shutdown: Some(shutdown), task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "eviction task ended abnormally");
        }
    }
}

impl Drop for EvictionHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
