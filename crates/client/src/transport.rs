//! The network seam between the agent and the outside world.

use async_trait::async_trait;
use harrow_core::{AgentRequest, CapturedResponse, Error};

/// Something that can put a request on the wire.
///
/// Implementations return `Ok` for every HTTP response, whatever its status;
/// `Err` means no response was obtained. Connectivity failures must map to
/// a transient error (`Error::Network` or `Error::FetchTimeout`) so the
/// agent can fall back to cache or queue the request for replay.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &AgentRequest) -> Result<CapturedResponse, Error>;
}
