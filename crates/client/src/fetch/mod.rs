//! HTTP fetch pipeline for agent traffic.
//!
//! ### URL Canonicalization
//! - Trim whitespace, resolve against the configured origin
//! - Lowercase host, remove fragments
//! - Preserve query string
//!
//! ### Limits
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)
//! - Request timeout (configurable)
//!
//! Every HTTP status is a response. Only failing to get one is an error, and
//! those are split into timeouts and plain connectivity loss.

pub mod url;

use reqwest::{Client, Method};
use std::time::{Duration, Instant};

pub use url::{UrlError, canonicalize};

use harrow_core::{AgentConfig, AgentRequest, CapturedResponse, Error};

use crate::transport::Transport;

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "harrow/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "harrow/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AgentConfig> for FetchConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Self::default()
        }
    }
}

/// HTTP client used by the agent for every outbound request.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Send a request and capture whatever comes back.
    ///
    /// Method, headers and body are forwarded as given. Returns `Ok` for any
    /// status; `Err` only when no response was obtained or it was too large.
    pub async fn execute(&self, request: &AgentRequest) -> Result<CapturedResponse, Error> {
        let start = Instant::now();
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid method {}: {}", request.method, e)))?;

        let mut builder = self.http.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify_error)?;
        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();

        let bytes = response.bytes().await.map_err(classify_error)?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            fetch_ms,
            bytes = bytes.len(),
            "fetched"
        );

        Ok(CapturedResponse { status: status.as_u16(), headers, body: bytes.to_vec() })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Transport for FetchClient {
    async fn send(&self, request: &AgentRequest) -> Result<CapturedResponse, Error> {
        self.execute(request).await
    }
}

fn classify_error(e: reqwest::Error) -> Error {
    if e.is_timeout() { Error::FetchTimeout(e.to_string()) } else { Error::Network(format!("network error: {}", e)) }
}
