//! Core types and shared functionality for harrow.
//!
//! This crate provides:
//! - Store database (versioned cache stores and the retry queue) with SQLite backend
//! - Request/response model and the route classifier
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod request;
pub mod route;

pub use cache::{CacheDb, DropReport, Entry, GenerationRecord, RetryTask, StoreHandle, StoreStats};
pub use config::{AgentConfig, ConfigError};
pub use error::Error;
pub use request::{AgentRequest, CapturedResponse};
pub use route::{Category, RouteClassifier};
