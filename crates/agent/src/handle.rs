//! Host-facing entry point.

use std::sync::Arc;

use harrow_client::Transport;
use harrow_core::{AgentConfig, AgentRequest, CacheDb, Error, RetryTask};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dispatch::{AgentMessage, AgentStatus, Dispatcher, Notification};
use crate::eviction::SweepReport;
use crate::generation::LifecycleState;
use crate::lifecycle::PreCacheReport;
use crate::retry::ReplayReport;
use crate::state::AgentState;
use crate::strategy::AgentResponse;

const NOTIFICATION_CAPACITY: usize = 64;

pub struct Agent;

impl Agent {
    /// Build the shared state and start the dispatcher task.
    ///
    /// The agent starts with no active generation; call
    /// [`AgentHandle::boot`] or [`AgentHandle::install`] to open the gate.
    pub fn spawn(
        config: AgentConfig, db: CacheDb, transport: Arc<dyn Transport>,
    ) -> Result<(AgentHandle, JoinHandle<()>), Error> {
        let state = Arc::new(AgentState::new(config, db, transport)?);
        let (tx, inbox) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let dispatcher = Dispatcher::new(state, inbox, notifications.clone());
        let task = tokio::spawn(dispatcher.run());

        Ok((AgentHandle { tx, notifications }, task))
    }
}

/// Cloneable sender side of the agent.
///
/// Every method fails with `Error::AgentStopped` once the dispatcher is gone.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::UnboundedSender<AgentMessage>,
    notifications: broadcast::Sender<Notification>,
}

impl AgentHandle {
    async fn call<T>(&self, message: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> AgentMessage) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(message(reply)).map_err(|_| Error::AgentStopped)?;
        rx.await.map_err(|_| Error::AgentStopped)?
    }

    pub async fn fetch(&self, request: AgentRequest) -> Result<AgentResponse, Error> {
        self.call(|reply| AgentMessage::Fetch { request, reply }).await
    }

    pub async fn boot(&self) -> Result<LifecycleState, Error> {
        self.call(|reply| AgentMessage::Boot { reply }).await
    }

    pub async fn install(&self, version: &str, manifest: Vec<String>) -> Result<LifecycleState, Error> {
        let version = version.to_string();
        self.call(|reply| AgentMessage::Install { version, manifest, reply }).await
    }

    /// Force-activate the waiting generation.
    pub async fn skip_waiting(&self) -> Result<LifecycleState, Error> {
        self.call(|reply| AgentMessage::SkipWaiting { reply }).await
    }

    pub async fn pre_cache(&self, urls: Vec<String>) -> Result<PreCacheReport, Error> {
        self.call(|reply| AgentMessage::PreCache { urls, reply }).await
    }

    pub async fn enqueue(&self, request: AgentRequest) -> Result<RetryTask, Error> {
        self.call(|reply| AgentMessage::Enqueue { request, reply }).await
    }

    /// Replay the retry queue and wait for the result.
    pub async fn connectivity_restored(&self) -> Result<ReplayReport, Error> {
        self.call(|reply| AgentMessage::ConnectivityRestored { reply: Some(reply) }).await
    }

    /// Trigger a replay without waiting; the outcome arrives as a
    /// [`Notification::RetryReplayed`].
    pub fn signal_connectivity_restored(&self) -> Result<(), Error> {
        self.tx.send(AgentMessage::ConnectivityRestored { reply: None }).map_err(|_| Error::AgentStopped)
    }

    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        self.call(|reply| AgentMessage::Sweep { reply }).await
    }

    pub async fn status(&self) -> Result<AgentStatus, Error> {
        self.call(|reply| AgentMessage::Status { reply }).await
    }

    /// Stop the dispatcher and the eviction timer.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(AgentMessage::Shutdown { reply }).map_err(|_| Error::AgentStopped)?;
        rx.await.map_err(|_| Error::AgentStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    async fn spawn() -> (AgentHandle, JoinHandle<()>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        Agent::spawn(AgentConfig::default(), db, Arc::new(ScriptedTransport::new())).unwrap()
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatcher() {
        let (handle, task) = spawn().await;
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(handle.status().await, Err(Error::AgentStopped)));
        assert!(matches!(handle.signal_connectivity_restored(), Err(Error::AgentStopped)));
    }

    #[tokio::test]
    async fn test_status_of_fresh_agent() {
        let (handle, _task) = spawn().await;
        let status = handle.status().await.unwrap();
        assert!(status.active.is_none());
        assert!(status.stores.is_empty());
        assert_eq!(status.pending_retries, 0);
        handle.shutdown().await.unwrap();
    }
}
