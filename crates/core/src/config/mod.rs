//! Agent configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HARROW_*)
//! 2. TOML config file (if HARROW_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! The loaded [`AgentConfig`] is built once at process start and passed by
//! reference into every component; nothing reads cache names or patterns
//! from globals.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Agent configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HARROW_*)
/// 2. TOML config file (if HARROW_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Path to the SQLite store database.
    ///
    /// Set via HARROW_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Origin the host application is served from; relative URLs
    /// (manifest entries, the offline page) resolve against it.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Version tag of the running generation, embedded in store names.
    #[serde(default = "default_version")]
    pub version: String,

    /// Prefix of every store name.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Shell URLs pre-cached into the static store at install.
    #[serde(default = "default_shell_manifest")]
    pub shell_manifest: Vec<String>,

    /// Page served for failed navigations when present in the static store.
    #[serde(default = "default_offline_url")]
    pub offline_url: String,

    /// Path suffixes (without the dot) classified as static assets.
    #[serde(default = "default_static_extensions")]
    pub static_extensions: Vec<String>,

    /// Regular expressions matched against the full URL to detect remote data.
    #[serde(default = "default_remote_data_patterns")]
    pub remote_data_patterns: Vec<String>,

    /// Entries older than this are removed by the eviction sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval between eviction sweeps, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via HARROW_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum response body bytes accepted from the network.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./harrow-cache.sqlite")
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_version() -> String {
    "v1".into()
}

fn default_cache_prefix() -> String {
    "harrow".into()
}

fn default_shell_manifest() -> Vec<String> {
    ["/", "/offline.html", "/manifest.json"].map(String::from).to_vec()
}

fn default_offline_url() -> String {
    "/offline.html".into()
}

fn default_static_extensions() -> Vec<String> {
    ["css", "js", "mjs", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "otf", "eot"]
        .map(String::from)
        .to_vec()
}

fn default_remote_data_patterns() -> Vec<String> {
    [r"/functions/v1/", r"/rest/v1/", r"/api/"].map(String::from).to_vec()
}

fn default_retention_days() -> u32 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_user_agent() -> String {
    "harrow/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            origin: default_origin(),
            version: default_version(),
            cache_prefix: default_cache_prefix(),
            shell_manifest: default_shell_manifest(),
            offline_url: default_offline_url(),
            static_extensions: default_static_extensions(),
            remote_data_patterns: default_remote_data_patterns(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl AgentConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    /// Name of the static store for a generation version.
    pub fn static_store_name(&self, version: &str) -> String {
        format!("{}-static-{}", self.cache_prefix, version)
    }

    /// Name of the dynamic store for a generation version.
    pub fn dynamic_store_name(&self, version: &str) -> String {
        format!("{}-dynamic-{}", self.cache_prefix, version)
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.origin).map_err(|e| ConfigError::Invalid { field: "origin".into(), reason: e.to_string() })
    }

    /// Resolve an absolute or origin-relative URL.
    pub fn resolve(&self, target: &str) -> Result<Url, ConfigError> {
        let target = target.trim();
        if target.contains("://") {
            return Url::parse(target)
                .map_err(|e| ConfigError::Invalid { field: "url".into(), reason: format!("{target}: {e}") });
        }
        self.origin_url()?
            .join(target)
            .map_err(|e| ConfigError::Invalid { field: "url".into(), reason: format!("{target}: {e}") })
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HARROW_`
    /// 2. TOML file from `HARROW_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HARROW_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HARROW_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
