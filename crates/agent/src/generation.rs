//! Generations and their lifecycle states.

use harrow_core::{AgentConfig, Error, GenerationRecord, StoreHandle};
use serde::Serialize;

/// Lifecycle state of one version generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Active,
    Redundant,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal step.
    ///
    /// Installing may only finish as waiting or redundant, waiting may be
    /// activated or superseded, and an active generation can only retire.
    pub fn can_become(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Installing, Waiting) | (Installing, Redundant) | (Waiting, Active) | (Waiting, Redundant) | (Active, Redundant)
        )
    }
}

/// The static and dynamic store of one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationStores {
    pub static_store: StoreHandle,
    pub dynamic_store: StoreHandle,
}

impl GenerationStores {
    pub fn for_version(config: &AgentConfig, version: &str) -> Self {
        Self {
            static_store: StoreHandle::named(config.static_store_name(version)),
            dynamic_store: StoreHandle::named(config.dynamic_store_name(version)),
        }
    }

    /// Stores named in a committed install record.
    pub fn recorded(record: &GenerationRecord) -> Self {
        Self {
            static_store: StoreHandle::named(record.static_store.as_str()),
            dynamic_store: StoreHandle::named(record.dynamic_store.as_str()),
        }
    }

    /// Allow-list passed to `drop_stores_except` on activation.
    pub fn names(&self) -> [&str; 2] {
        [self.static_store.name(), self.dynamic_store.name()]
    }
}

/// One version's stores plus where it is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub version: String,
    pub state: LifecycleState,
    pub stores: GenerationStores,
}

impl Generation {
    pub fn installing(config: &AgentConfig, version: &str) -> Self {
        Self {
            version: version.to_string(),
            state: LifecycleState::Installing,
            stores: GenerationStores::for_version(config, version),
        }
    }

    /// A generation whose install committed in an earlier run, ready to
    /// activate without refetching.
    pub fn restored(record: &GenerationRecord) -> Self {
        Self {
            version: record.version.clone(),
            state: LifecycleState::Waiting,
            stores: GenerationStores::recorded(record),
        }
    }

    pub fn transition(&mut self, next: LifecycleState) -> Result<(), Error> {
        if !self.state.can_become(next) {
            return Err(Error::InvalidInput(format!(
                "generation {} cannot go from {:?} to {:?}",
                self.version, self.state, next
            )));
        }
        tracing::info!(version = %self.version, from = ?self.state, to = ?next, "generation state changed");
        self.state = next;
        Ok(())
    }
}
