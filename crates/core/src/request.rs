//! Intercepted request and captured response model.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::hash::compute_request_key;

/// An outbound request intercepted from the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    /// Upper-case HTTP method.
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Set when the request is a top-level page navigation.
    pub navigation: bool,
}

impl AgentRequest {
    /// Create a request with the given method, normalized to upper case.
    pub fn new(method: &str, url: Url) -> Self {
        Self { method: method.trim().to_ascii_uppercase(), url, headers: Vec::new(), body: None, navigation: false }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// A page navigation (always GET).
    pub fn navigate(url: Url) -> Self {
        Self { navigation: true, ..Self::get(url) }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Only GET requests are ever cached.
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Normalized request identity used as the store key.
    pub fn cache_key(&self) -> String {
        compute_request_key(&self.method, &self.url)
    }
}

/// A verbatim snapshot of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}
