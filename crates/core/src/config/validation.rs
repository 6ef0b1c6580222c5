//! Configuration validation rules.
//!
//! This module provides validation logic for `AgentConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AgentConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AgentConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `version` or `cache_prefix` is empty or contains whitespace
    /// - `origin` is not an http(s) URL
    /// - `retention_days` is 0
    /// - `sweep_interval_secs` is under a minute
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - a remote-data pattern is not a valid regular expression
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("version", &self.version), ("cache_prefix", &self.cache_prefix)] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { field: field.into(), hint: format!("set HARROW_{}", field.to_uppercase()) });
            }
            if value.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must not contain whitespace".into() });
            }
        }

        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "origin".into(),
                reason: format!("unsupported scheme: {}", origin.scheme()),
            });
        }

        if self.retention_days == 0 {
            return Err(ConfigError::Invalid { field: "retention_days".into(), reason: "must be greater than 0".into() });
        }

        if self.sweep_interval_secs < 60 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs".into(),
                reason: "must be at least 60 seconds".into(),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }

        for pattern in &self.remote_data_patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::Invalid {
                field: "remote_data_patterns".into(),
                reason: format!("{pattern}: {e}"),
            })?;
        }

        if self.shell_manifest.is_empty() {
            tracing::warn!("shell_manifest is empty; install will cache nothing");
        } else if !self.shell_manifest.contains(&self.offline_url) {
            tracing::warn!(
                offline_url = %self.offline_url,
                "offline_url is not in shell_manifest; failed navigations will get the built-in placeholder"
            );
        }

        Ok(())
    }
}
