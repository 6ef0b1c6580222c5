//! Scripted transport for driving the agent without a network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use harrow_client::Transport;
use harrow_core::{AgentRequest, CapturedResponse, Error};

/// A [`Transport`] answering from a fixed URL table.
///
/// Unknown URLs answer 404. While offline every call fails with
/// `Error::Network`. Every call is recorded, offline ones included.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, CapturedResponse>>,
    offline: AtomicBool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
        self.respond_with(url, CapturedResponse::new(status, body))
    }

    pub fn respond_with(&self, url: &str, response: CapturedResponse) -> &Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.to_string(), response);
        }
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Recorded `(method, url)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|(_, u)| u == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &AgentRequest) -> Result<CapturedResponse, Error> {
        let url = request.url.to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((request.method.clone(), url.clone()));
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!("offline: {url}")));
        }

        let routes = self.routes.lock().map_err(|_| Error::Network("transport poisoned".into()))?;
        Ok(routes.get(&url).cloned().unwrap_or_else(|| CapturedResponse::new(404, "not found")))
    }
}
