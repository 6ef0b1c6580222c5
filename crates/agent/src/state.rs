//! Shared agent state.
//!
//! Built once at startup and shared by `Arc` with the dispatcher and every
//! request task. The only mutable part is the active-generation gate.

use std::sync::Arc;

use harrow_client::{Transport, canonicalize};
use harrow_core::{AgentConfig, CacheDb, Error, RouteClassifier};
use tokio::sync::RwLock;
use url::Url;

use crate::generation::GenerationStores;

pub struct AgentState {
    pub config: AgentConfig,
    pub db: CacheDb,
    pub transport: Arc<dyn Transport>,
    pub classifier: RouteClassifier,
    origin: Url,
    active: RwLock<Option<GenerationStores>>,
}

impl AgentState {
    pub fn new(config: AgentConfig, db: CacheDb, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        let classifier = RouteClassifier::from_config(&config)?;
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { config, db, transport, classifier, origin, active: RwLock::new(None) })
    }

    /// Stores of the active generation, `None` while nothing is active.
    pub async fn active_stores(&self) -> Option<GenerationStores> {
        self.active.read().await.clone()
    }

    pub(crate) async fn set_active(&self, stores: GenerationStores) {
        *self.active.write().await = Some(stores);
    }

    /// Resolve a host-supplied URL against the configured origin.
    pub fn resolve(&self, target: &str) -> Result<Url, Error> {
        canonicalize(target, Some(&self.origin)).map_err(|e| Error::InvalidUrl(format!("{target}: {e}")))
    }
}
