//! Command-line arguments.

use clap::{Parser, Subcommand, ValueEnum};

/// harrow - offline caching agent for the fact-check web app.
#[derive(Parser, Debug)]
#[command(name = "harrow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log output format (stderr)
    #[arg(long, value_enum, default_value = "json", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request through the agent
    Fetch(FetchArgs),

    /// Install a generation from a shell manifest
    Install(InstallArgs),

    /// Fetch URLs into the current dynamic store
    Precache {
        /// URLs, absolute or relative to the configured origin
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Queue a mutating request for later replay
    Enqueue(RequestArgs),

    /// Replay queued requests now
    Replay,

    /// Evict expired entries now
    Sweep,

    /// Show generations, stores and queue size
    Status,

    /// Keep the agent running, replaying the queue whenever connectivity returns
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Target URL, absolute or relative to the configured origin
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "POST")]
    pub method: String,

    /// Header as `name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    pub data: Option<String>,
}

#[derive(Parser, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Treat the request as a page navigation
    #[arg(long)]
    pub navigate: bool,
}

#[derive(Parser, Debug)]
pub struct InstallArgs {
    /// Version tag; defaults to the configured version
    #[arg(id = "version_tag", value_name = "VERSION")]
    pub version: Option<String>,

    /// Manifest URL (repeatable); defaults to the configured shell manifest
    #[arg(long = "url", value_name = "URL")]
    pub manifest: Vec<String>,

    /// Activate right away instead of waiting
    #[arg(long)]
    pub activate: bool,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// URL probed to detect connectivity; defaults to the origin
    #[arg(long)]
    pub probe: Option<String>,

    /// Seconds between connectivity probes
    #[arg(long, default_value_t = 30, env = "HARROW_PROBE_INTERVAL_SECS")]
    pub probe_interval: u64,
}

/// Split `name: value`.
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
