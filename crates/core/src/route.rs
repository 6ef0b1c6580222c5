//! Request route classification.
//!
//! Assigns every GET request to exactly one category. Rules, in order:
//! navigation flag, static file extension on the path, remote-data URL
//! pattern, then everything else. Non-GET requests never reach the
//! classifier; the dispatcher sends them down the retry path instead.

use regex::Regex;
use serde::Serialize;

use crate::{AgentConfig, AgentRequest, Error};

/// Category assigned to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Navigation,
    StaticAsset,
    RemoteData,
    Other,
}

/// Pure classifier built once from configuration.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    static_suffix: Option<Regex>,
    remote_data: Vec<Regex>,
}

impl RouteClassifier {
    /// Build from extension list and remote-data patterns.
    pub fn new(static_extensions: &[String], remote_data_patterns: &[String]) -> Result<Self, Error> {
        let extensions: Vec<String> = static_extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.'))
            .filter(|e| !e.is_empty())
            .map(regex::escape)
            .collect();

        let static_suffix = if extensions.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)\.(?:{})$", extensions.join("|"));
            Some(Regex::new(&pattern).map_err(|e| Error::InvalidInput(format!("static extensions: {e}")))?)
        };

        let remote_data = remote_data_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| Error::InvalidInput(format!("remote-data pattern {p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { static_suffix, remote_data })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, Error> {
        Self::new(&config.static_extensions, &config.remote_data_patterns)
    }

    /// Classify a request. Total and deterministic.
    pub fn classify(&self, request: &AgentRequest) -> Category {
        if request.navigation {
            return Category::Navigation;
        }

        if let Some(suffix) = &self.static_suffix
            && suffix.is_match(request.url.path())
        {
            return Category::StaticAsset;
        }

        if self.remote_data.iter().any(|p| p.is_match(request.url.as_str())) {
            return Category::RemoteData;
        }

        Category::Other
    }
}
