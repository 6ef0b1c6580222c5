//! SQLite-backed store database for cached responses and the retry queue.
//!
//! This module provides persistent storage using SQLite with async access
//! via tokio-rusqlite. It supports:
//!
//! - Named, versioned stores of captured responses keyed by request identity
//! - Whole-entry upsert semantics (entries are replaced, never patched)
//! - Best-effort bulk store deletion during activation
//! - Age-based eviction against an explicit `stored_at` timestamp
//! - A durable, insertion-ordered retry queue
//! - Atomic install commits and a persisted active-generation pointer
//! - Automatic schema migrations and WAL mode for concurrent access

pub mod connection;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod retry;
pub mod stores;

pub use crate::Error;

pub use connection::CacheDb;
pub use generations::GenerationRecord;
pub use retry::RetryTask;
pub use stores::{DropReport, Entry, StoreHandle, StoreStats};

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp in the fixed-width form stored in the database.
///
/// Millisecond precision with a `Z` suffix keeps lexicographic and
/// chronological order identical, which the eviction query relies on.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::CorruptEntry(format!("bad timestamp '{value}': {e}")))
}
