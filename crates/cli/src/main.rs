//! harrow command-line entry point.
//!
//! Logging goes to stderr so stdout carries only command output (JSON).

use anyhow::Result;
use clap::Parser;
use harrow_core::AgentConfig;
use tracing_subscriber::EnvFilter;

mod args;
mod commands;

use args::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    let config = AgentConfig::load()?;
    tracing::debug!(version = %config.version, db = %config.db_path.display(), "configuration loaded");

    commands::execute(cli.command, config).await
}
