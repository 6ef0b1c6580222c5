//! Network side of harrow.
//!
//! This crate provides the [`Transport`] seam the agent fetches through, the
//! reqwest-backed [`FetchClient`] implementing it, and URL canonicalization
//! for inputs coming from the host application.

pub mod fetch;
pub mod transport;

pub use fetch::{FetchClient, FetchConfig, UrlError, canonicalize};
pub use transport::Transport;
