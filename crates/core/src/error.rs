//! Unified error types for harrow.
//!
//! Every variant renders with a stable, upper-case code prefix so the host
//! application can branch on the failure class without parsing messages.

use tokio_rusqlite::rusqlite;

/// Unified error type for the caching agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty manifest entry).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// No cache entry found for the given key.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded.
    #[error("CACHE_ERROR: corrupt entry: {0}")]
    CorruptEntry(String),

    /// Transport-level failure: DNS, refused connection, reset, offline.
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// HTTP error response where a success status was required.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Shell pre-population failed; the generation will never activate.
    #[error("INSTALL_FAILED: {0}")]
    InstallFailed(String),

    /// A mutating request failed offline and was appended to the retry queue.
    #[error("QUEUED_FOR_RETRY: {0}")]
    QueuedForRetry(String),

    /// The agent dispatcher is no longer running.
    #[error("AGENT_STOPPED")]
    AgentStopped,
}

impl Error {
    /// Stable error code, the prefix of the rendered message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::CacheMiss(_) => "CACHE_MISS",
            Error::Database(_) | Error::MigrationFailed(_) | Error::CorruptEntry(_) => "CACHE_ERROR",
            Error::Network(_) => "NETWORK_ERROR",
            Error::FetchTimeout(_) => "FETCH_TIMEOUT",
            Error::FetchTooLarge(_) => "FETCH_TOO_LARGE",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::InstallFailed(_) => "INSTALL_FAILED",
            Error::QueuedForRetry(_) => "QUEUED_FOR_RETRY",
            Error::AgentStopped => "AGENT_STOPPED",
        }
    }

    /// Whether the failure is a connectivity problem that a later retry may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::FetchTimeout(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CorruptEntry(err.to_string())
    }
}
