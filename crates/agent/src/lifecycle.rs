//! Generation lifecycle: install, activate, pre-cache.
//!
//! The controller is owned by the dispatcher task, so its transitions are
//! serialized. Request tasks only see the result through the active gate on
//! [`AgentState`].

use std::sync::Arc;

use harrow_core::{AgentRequest, CapturedResponse, Entry, Error};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::dispatch::Notification;
use crate::eviction::EvictionHandle;
use crate::generation::{Generation, GenerationStores, LifecycleState};
use crate::state::AgentState;

/// Outcome of an explicit pre-cache request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreCacheReport {
    pub cached: usize,
    pub failed: Vec<(String, String)>,
}

pub struct LifecycleController {
    state: Arc<AgentState>,
    notifications: broadcast::Sender<Notification>,
    active: Option<Generation>,
    waiting: Option<Generation>,
    eviction: Option<EvictionHandle>,
}

impl LifecycleController {
    pub fn new(state: Arc<AgentState>, notifications: broadcast::Sender<Notification>) -> Self {
        Self { state, notifications, active: None, waiting: None, eviction: None }
    }

    pub fn active(&self) -> Option<&Generation> {
        self.active.as_ref()
    }

    pub fn waiting(&self) -> Option<&Generation> {
        self.waiting.as_ref()
    }

    /// Bring up the configured version.
    ///
    /// A version whose install committed in an earlier run is re-activated
    /// as-is. Otherwise the generation recorded as active is restored first,
    /// then the configured shell manifest is installed and activated. If that
    /// install fails the restored generation keeps serving.
    pub async fn boot(&mut self) -> Result<LifecycleState, Error> {
        let version = self.state.config.version.clone();
        if self.active.as_ref().is_some_and(|g| g.version == version) {
            return Ok(LifecycleState::Active);
        }

        if let Some(generation) = self.installed(&version).await? {
            tracing::info!(version = %version, "restoring installed generation");
            self.activate(generation).await?;
            return Ok(LifecycleState::Active);
        }

        if self.active.is_none()
            && let Some(previous) = self.state.db.active_generation().await?
            && previous.version != version
        {
            tracing::info!(version = %previous.version, configured = %version, "restoring previous generation before upgrade");
            self.activate(Generation::restored(&previous)).await?;
        }

        let manifest = self.state.config.shell_manifest.clone();
        match self.install(&version, &manifest).await? {
            LifecycleState::Waiting => self.skip_waiting().await,
            state => Ok(state),
        }
    }

    /// Committed install of `version`, if its stores match the configured
    /// names.
    async fn installed(&self, version: &str) -> Result<Option<Generation>, Error> {
        let Some(record) = self.state.db.generation(version).await? else {
            return Ok(None);
        };
        let generation = Generation::restored(&record);
        if generation.stores != GenerationStores::for_version(&self.state.config, version) {
            tracing::info!(version, "installed generation uses other store names, reinstalling");
            return Ok(None);
        }
        Ok(Some(generation))
    }

    /// Install a generation: fetch every manifest URL, then commit them all.
    ///
    /// Any fetch error or non-2xx status fails the install before anything is
    /// written, and the commit is a single transaction, so the active
    /// generation and its stores are untouched on failure.
    pub async fn install(&mut self, version: &str, manifest: &[String]) -> Result<LifecycleState, Error> {
        if version.trim().is_empty() {
            return Err(Error::InvalidInput("version cannot be empty".into()));
        }
        if self.active.as_ref().is_some_and(|g| g.version == version) {
            return Err(Error::InvalidInput(format!("generation {version} is already active")));
        }

        let mut generation = Generation::installing(&self.state.config, version);
        tracing::info!(version, urls = manifest.len(), "installing generation");

        let fetched = match self.fetch_manifest(manifest).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail_install(generation, e)),
        };

        let shell: Vec<(String, Entry)> = fetched
            .iter()
            .map(|(request, response)| (request.cache_key(), Entry::capture(request, response)))
            .collect();
        let stores = &generation.stores;
        let committed = self
            .state
            .db
            .commit_install(version, &stores.static_store, &stores.dynamic_store, &shell)
            .await;
        if let Err(e) = committed {
            return Err(self.fail_install(generation, e));
        }

        generation.transition(LifecycleState::Waiting)?;
        self.notify(Notification::GenerationWaiting { version: version.to_string() });

        if let Some(mut superseded) = self.waiting.take() {
            superseded.transition(LifecycleState::Redundant)?;
        }

        if self.active.is_none() {
            self.activate(generation).await?;
            return Ok(LifecycleState::Active);
        }

        self.waiting = Some(generation);
        Ok(LifecycleState::Waiting)
    }

    /// Activate the waiting generation now.
    pub async fn skip_waiting(&mut self) -> Result<LifecycleState, Error> {
        let generation = self.waiting.take().ok_or_else(|| Error::InvalidInput("no generation is waiting".into()))?;
        self.activate(generation).await?;
        Ok(LifecycleState::Active)
    }

    /// Drop every other store, record this generation as active, open the
    /// gate on its stores and restart the eviction timer. Store deletion is
    /// best-effort.
    async fn activate(&mut self, mut generation: Generation) -> Result<(), Error> {
        match self.state.db.drop_stores_except(&generation.stores.names()).await {
            Ok(report) if !report.failed.is_empty() => {
                tracing::warn!(failed = report.failed.len(), "some stale stores survived activation");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not list stores for cleanup"),
        }

        for name in generation.stores.names() {
            self.state.db.open_store(name).await?;
        }

        generation.transition(LifecycleState::Active)?;
        if let Some(mut previous) = self.active.take() {
            previous.transition(LifecycleState::Redundant)?;
        }

        match self.state.db.mark_generation_active(&generation.version).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(version = %generation.version, "no install record, next boot will reinstall"),
            Err(e) => tracing::warn!(version = %generation.version, error = %e, "could not record active generation"),
        }

        self.state.set_active(generation.stores.clone()).await;
        self.restart_eviction().await;
        self.notify(Notification::GenerationActivated { version: generation.version.clone() });
        self.active = Some(generation);
        Ok(())
    }

    async fn restart_eviction(&mut self) {
        if let Some(handle) = self.eviction.take() {
            handle.stop().await;
        }
        let config = &self.state.config;
        self.eviction = Some(EvictionHandle::spawn(self.state.db.clone(), config.sweep_interval(), config.retention()));
    }

    /// Stop the eviction timer.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.eviction.take() {
            handle.stop().await;
        }
        tracing::info!("lifecycle controller stopped");
    }

    async fn fetch_manifest(&self, manifest: &[String]) -> Result<Vec<(AgentRequest, CapturedResponse)>, Error> {
        let mut fetched = Vec::with_capacity(manifest.len());
        for target in manifest {
            let request = AgentRequest::get(self.state.resolve(target)?);
            let response = self.state.transport.send(&request).await?;
            if !response.is_success() {
                return Err(Error::HttpError(format!("{} returned status {}", request.url, response.status)));
            }
            fetched.push((request, response));
        }
        Ok(fetched)
    }

    fn fail_install(&self, mut generation: Generation, cause: Error) -> Error {
        let reason = cause.to_string();
        tracing::warn!(version = %generation.version, reason = %reason, "install failed");
        if let Err(e) = generation.transition(LifecycleState::Redundant) {
            tracing::warn!(error = %e, "unexpected state after failed install");
        }
        self.notify(Notification::InstallFailed { version: generation.version, reason: reason.clone() });
        Error::InstallFailed(reason)
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            tracing::debug!("no notification subscribers");
        }
    }
}

/// Fetch and store URLs into the active dynamic store, best-effort per URL.
pub async fn pre_cache(state: &AgentState, urls: &[String]) -> Result<PreCacheReport, Error> {
    let stores = state.active_stores().await.ok_or_else(|| Error::InvalidInput("no active generation".into()))?;
    let mut report = PreCacheReport::default();

    for target in urls {
        let outcome = async {
            let request = AgentRequest::get(state.resolve(target)?);
            let response = state.transport.send(&request).await?;
            if !response.is_success() {
                return Err(Error::HttpError(format!("status {}", response.status)));
            }
            state.db.put_entry(&stores.dynamic_store, &request.cache_key(), &Entry::capture(&request, &response)).await
        }
        .await;

        match outcome {
            Ok(()) => report.cached += 1,
            Err(e) => {
                tracing::warn!(url = %target, error = %e, "pre-cache failed");
                report.failed.push((target.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(cached = report.cached, failed = report.failed.len(), "pre-cache finished");
    Ok(report)
}
