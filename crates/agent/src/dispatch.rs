//! Message dispatch.
//!
//! All inbound traffic, requests and control signals alike, arrives as an
//! [`AgentMessage`] on one channel. The dispatcher owns the lifecycle
//! controller and handles lifecycle messages inline, in arrival order.
//! Requests, replays, pre-caching and sweeps are spawned as independent
//! tasks so a slow fetch never holds up the queue.

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use harrow_core::{AgentRequest, Error, RetryTask, StoreStats};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::eviction::{SweepReport, sweep};
use crate::generation::{Generation, LifecycleState};
use crate::lifecycle::{LifecycleController, PreCacheReport, pre_cache};
use crate::retry::{ReplayReport, RetryQueue};
use crate::state::AgentState;
use crate::strategy::{self, AgentResponse};

type Reply<T> = oneshot::Sender<Result<T, Error>>;

/// Inbound messages from the host application.
#[derive(Debug)]
pub enum AgentMessage {
    /// An intercepted outbound request.
    Fetch { request: AgentRequest, reply: Reply<AgentResponse> },
    /// Restore or install the configured generation.
    Boot { reply: Reply<LifecycleState> },
    Install { version: String, manifest: Vec<String>, reply: Reply<LifecycleState> },
    /// Activate the waiting generation now.
    SkipWaiting { reply: Reply<LifecycleState> },
    PreCache { urls: Vec<String>, reply: Reply<PreCacheReport> },
    /// Queue a mutating request for replay without trying it first.
    Enqueue { request: AgentRequest, reply: Reply<RetryTask> },
    /// Connectivity is back; replay the retry queue.
    ConnectivityRestored { reply: Option<Reply<ReplayReport>> },
    /// Run an eviction sweep now.
    Sweep { reply: Reply<SweepReport> },
    Status { reply: Reply<AgentStatus> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Outbound notifications for the host to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    /// An update is installed and waiting for skip-waiting.
    GenerationWaiting { version: String },
    /// A generation took over; content may have changed.
    GenerationActivated { version: String },
    InstallFailed { version: String, reason: String },
    RetryReplayed { replayed: usize, retained: usize, skipped: usize },
}

/// Snapshot of the agent for status output.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub active: Option<Generation>,
    pub waiting: Option<Generation>,
    pub stores: Vec<StoreStats>,
    pub pending_retries: u64,
    pub schema_version: i64,
}

pub struct Dispatcher {
    state: Arc<AgentState>,
    lifecycle: LifecycleController,
    retry: RetryQueue,
    notifications: broadcast::Sender<Notification>,
    inbox: mpsc::UnboundedReceiver<AgentMessage>,
}

impl Dispatcher {
    pub fn new(
        state: Arc<AgentState>, inbox: mpsc::UnboundedReceiver<AgentMessage>, notifications: broadcast::Sender<Notification>,
    ) -> Self {
        let lifecycle = LifecycleController::new(state.clone(), notifications.clone());
        let retry = RetryQueue::new(state.db.clone());
        Self { state, lifecycle, retry, notifications, inbox }
    }

    /// Consume messages until a shutdown message arrives or every sender is
    /// gone. In-flight request tasks are not awaited.
    pub async fn run(mut self) {
        tracing::info!("agent dispatcher started");

        let mut shutdown_reply = None;
        while let Some(message) = self.inbox.recv().await {
            if let ControlFlow::Break(reply) = self.dispatch(message).await {
                shutdown_reply = Some(reply);
                break;
            }
        }

        self.lifecycle.shutdown().await;
        tracing::info!("agent dispatcher stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn dispatch(&mut self, message: AgentMessage) -> ControlFlow<oneshot::Sender<()>> {
        match message {
            AgentMessage::Fetch { request, reply } => {
                let state = self.state.clone();
                let retry = self.retry.clone();
                tokio::spawn(async move {
                    let _ = reply.send(handle_request(&state, &retry, request).await);
                });
            }
            AgentMessage::Boot { reply } => {
                let _ = reply.send(self.lifecycle.boot().await);
            }
            AgentMessage::Install { version, manifest, reply } => {
                let _ = reply.send(self.lifecycle.install(&version, &manifest).await);
            }
            AgentMessage::SkipWaiting { reply } => {
                let _ = reply.send(self.lifecycle.skip_waiting().await);
            }
            AgentMessage::PreCache { urls, reply } => {
                let state = self.state.clone();
                tokio::spawn(async move {
                    let _ = reply.send(pre_cache(&state, &urls).await);
                });
            }
            AgentMessage::Enqueue { request, reply } => {
                let retry = self.retry.clone();
                tokio::spawn(async move {
                    let _ = reply.send(retry.enqueue(&request).await);
                });
            }
            AgentMessage::ConnectivityRestored { reply } => {
                let state = self.state.clone();
                let retry = self.retry.clone();
                let notifications = self.notifications.clone();
                tokio::spawn(async move {
                    let result = retry.replay(state.transport.as_ref()).await;
                    match &result {
                        Ok(report) => {
                            let _ = notifications.send(Notification::RetryReplayed {
                                replayed: report.replayed,
                                retained: report.retained,
                                skipped: report.skipped,
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "retry replay aborted"),
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                });
            }
            AgentMessage::Sweep { reply } => {
                let state = self.state.clone();
                tokio::spawn(async move {
                    let _ = reply.send(sweep(&state.db, Utc::now(), state.config.retention()).await);
                });
            }
            AgentMessage::Status { reply } => {
                let _ = reply.send(self.status().await);
            }
            AgentMessage::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    async fn status(&self) -> Result<AgentStatus, Error> {
        Ok(AgentStatus {
            active: self.lifecycle.active().cloned(),
            waiting: self.lifecycle.waiting().cloned(),
            stores: self.state.db.store_stats().await?,
            pending_retries: self.state.db.count_retry_tasks().await?,
            schema_version: self.state.db.schema_version().await?,
        })
    }
}

/// Route one intercepted request.
///
/// Mutating requests go straight to the network; a connectivity failure
/// queues them and reports `Error::QueuedForRetry` with the task id. GET
/// requests pass the active gate (no active generation means plain network)
/// and are then classified and executed.
pub async fn handle_request(state: &AgentState, retry: &RetryQueue, request: AgentRequest) -> Result<AgentResponse, Error> {
    if !request.is_get() {
        return match state.transport.send(&request).await {
            Ok(response) => Ok(AgentResponse::network(response)),
            Err(e) if e.is_transient() => {
                let task = retry.enqueue(&request).await?;
                tracing::warn!(id = %task.id, url = %request.url, error = %e, "mutating request failed offline");
                Err(Error::QueuedForRetry(task.id))
            }
            Err(e) => Err(e),
        };
    }

    let Some(stores) = state.active_stores().await else {
        tracing::debug!(url = %request.url, "no active generation, passing through");
        return state.transport.send(&request).await.map(AgentResponse::network);
    };

    let category = state.classifier.classify(&request);
    strategy::execute(state, &stores, category, &request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationStores;
    use crate::strategy::ResponseSource;
    use crate::testing::ScriptedTransport;
    use harrow_core::{AgentConfig, CacheDb};
    use url::Url;

    const ORIGIN: &str = "https://farm.example";

    async fn setup() -> (AgentState, RetryQueue, Arc<ScriptedTransport>) {
        let config = AgentConfig { origin: ORIGIN.into(), ..Default::default() };
        let db = CacheDb::open_in_memory().await.unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let retry = RetryQueue::new(db.clone());
        (AgentState::new(config, db, transport.clone()).unwrap(), retry, transport)
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("{ORIGIN}{path}")).unwrap()
    }

    #[tokio::test]
    async fn test_post_offline_is_queued() {
        let (state, retry, transport) = setup().await;
        transport.set_offline(true);
        let request = AgentRequest::new("POST", url("/rest/v1/reports")).with_body("{}");

        let err = handle_request(&state, &retry, request.clone()).await.unwrap_err();
        let Error::QueuedForRetry(id) = &err else { panic!("expected QueuedForRetry, got {err:?}") };

        let pending = retry.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(&pending[0].id, id);
        assert_eq!(pending[0].to_request().unwrap(), request);
    }

    #[tokio::test]
    async fn test_post_online_not_queued() {
        let (state, retry, transport) = setup().await;
        transport.respond(url("/rest/v1/reports").as_str(), 201, "");

        let response = handle_request(&state, &retry, AgentRequest::new("POST", url("/rest/v1/reports"))).await.unwrap();
        assert_eq!(response.response.status, 201);
        assert!(retry.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gate_closed_passes_through_uncached() {
        let (state, retry, transport) = setup().await;
        transport.respond(url("/shell.js").as_str(), 200, "js");

        let response = handle_request(&state, &retry, AgentRequest::get(url("/shell.js"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert!(state.db.list_store_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gate_open_classifies() {
        let (state, retry, transport) = setup().await;
        let stores = GenerationStores::for_version(&state.config, "v1");
        for name in stores.names() {
            state.db.open_store(name).await.unwrap();
        }
        state.set_active(stores.clone()).await;
        transport.respond(url("/shell.js").as_str(), 200, "js");

        handle_request(&state, &retry, AgentRequest::get(url("/shell.js"))).await.unwrap();
        let response = handle_request(&state, &retry, AgentRequest::get(url("/shell.js"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(transport.call_count(url("/shell.js").as_str()), 1);
    }

    #[test]
    fn test_notification_serializes_tagged() {
        let json = serde_json::to_value(Notification::GenerationWaiting { version: "v2".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "generation-waiting", "version": "v2" }));
    }
}
