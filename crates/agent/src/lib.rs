//! The caching and request-resilience agent.
//!
//! Every outbound request from the host application becomes an
//! [`AgentMessage`] on a single channel. One dispatcher task owns the
//! [`LifecycleController`] and routes each message: requests pass the
//! active-generation gate and the route classifier and are then executed by
//! a [`Strategy`] against the two current stores. Retry replay and eviction
//! run off the request path.
//!
//! ```no_run
//! # async fn demo() -> Result<(), harrow_core::Error> {
//! use std::sync::Arc;
//! use harrow_agent::Agent;
//! use harrow_client::{FetchClient, FetchConfig};
//! use harrow_core::{AgentConfig, CacheDb};
//!
//! let config = AgentConfig::default();
//! let db = CacheDb::open(&config.db_path).await?;
//! let transport = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
//! let (handle, _task) = Agent::spawn(config, db, transport)?;
//! handle.boot().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod eviction;
pub mod generation;
pub mod handle;
pub mod lifecycle;
pub mod retry;
pub mod state;
pub mod strategy;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use dispatch::{AgentMessage, AgentStatus, Dispatcher, Notification};
pub use eviction::{EvictionHandle, SweepReport, sweep};
pub use generation::{Generation, GenerationStores, LifecycleState};
pub use handle::{Agent, AgentHandle};
pub use lifecycle::{LifecycleController, PreCacheReport};
pub use retry::{ReplayReport, RetryQueue};
pub use state::AgentState;
pub use strategy::{AgentResponse, ResponseSource, Strategy};
