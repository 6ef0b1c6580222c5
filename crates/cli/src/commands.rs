//! Subcommand implementations.
//!
//! Each invocation opens the store database, starts an agent on the real
//! HTTP client, runs one command through the agent handle and shuts it down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use harrow_agent::{Agent, AgentHandle, LifecycleState, ResponseSource};
use harrow_client::{FetchClient, FetchConfig, canonicalize};
use harrow_core::{AgentConfig, AgentRequest, CacheDb};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::args::{Commands, FetchArgs, InstallArgs, RequestArgs, RunArgs, parse_header};

#[derive(Serialize)]
struct FetchOutput<'a> {
    status: u16,
    source: ResponseSource,
    store: Option<&'a str>,
    headers: &'a [(String, String)],
    body: String,
}

#[derive(Serialize)]
struct InstallOutput<'a> {
    version: &'a str,
    state: LifecycleState,
}

pub async fn execute(command: Commands, config: AgentConfig) -> Result<()> {
    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let client = FetchClient::new(FetchConfig::from(&config))?;
    let (agent, task) = Agent::spawn(config.clone(), db, Arc::new(client.clone()))?;

    let result = run_command(&agent, &client, &config, command).await;

    agent.shutdown().await?;
    task.await?;
    result
}

async fn run_command(agent: &AgentHandle, client: &FetchClient, config: &AgentConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Fetch(args) => fetch(agent, config, args).await,
        Commands::Install(args) => install(agent, config, args).await,
        Commands::Precache { urls } => {
            boot(agent).await;
            print_json(&agent.pre_cache(urls).await?)
        }
        Commands::Enqueue(args) => {
            let request = build_request(config, &args, false)?;
            print_json(&agent.enqueue(request).await?)
        }
        Commands::Replay => print_json(&agent.connectivity_restored().await?),
        Commands::Sweep => print_json(&agent.sweep().await?),
        Commands::Status => print_json(&agent.status().await?),
        Commands::Run(args) => run(agent, client, config, args).await,
    }
}

/// Open the gate for request commands. A failed boot leaves the agent in
/// pass-through mode rather than aborting the command.
async fn boot(agent: &AgentHandle) {
    if let Err(e) = agent.boot().await {
        tracing::warn!(error = %e, "boot failed, continuing without an active generation");
    }
}

async fn fetch(agent: &AgentHandle, config: &AgentConfig, args: FetchArgs) -> Result<()> {
    let request = build_request(config, &args.request, args.navigate)?;
    boot(agent).await;

    let response = agent.fetch(request).await?;
    print_json(&FetchOutput {
        status: response.response.status,
        source: response.source,
        store: response.store.as_deref(),
        headers: &response.response.headers,
        body: response.response.text(),
    })
}

async fn install(agent: &AgentHandle, config: &AgentConfig, args: InstallArgs) -> Result<()> {
    let version = args.version.unwrap_or_else(|| config.version.clone());
    let manifest = if args.manifest.is_empty() { config.shell_manifest.clone() } else { args.manifest };

    if version != config.version {
        boot(agent).await;
    }

    let mut state = agent.install(&version, manifest).await?;
    if state == LifecycleState::Waiting && args.activate {
        state = agent.skip_waiting().await?;
    }

    print_json(&InstallOutput { version: &version, state })
}

async fn run(agent: &AgentHandle, client: &FetchClient, config: &AgentConfig, args: RunArgs) -> Result<()> {
    boot(agent).await;

    let target = args.probe.as_deref().unwrap_or(&config.origin);
    let probe = AgentRequest::get(canonicalize(target, Some(&config.origin_url()?))?);
    let mut ticker = tokio::time::interval(Duration::from_secs(args.probe_interval.max(1)));
    let mut events = agent.subscribe();
    let mut online = false;

    tracing::info!(probe = %probe.url, interval_secs = args.probe_interval, "agent running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(notification) => tracing::info!(?notification, "agent notification"),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "dropped agent notifications"),
                Err(RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                let reachable = client.execute(&probe).await.is_ok();
                if reachable != online {
                    tracing::info!(online = reachable, "connectivity changed");
                    if reachable {
                        agent.signal_connectivity_restored()?;
                    }
                }
                online = reachable;
            }
        }
    }

    Ok(())
}

fn build_request(config: &AgentConfig, args: &RequestArgs, navigate: bool) -> Result<AgentRequest> {
    let url = canonicalize(&args.url, Some(&config.origin_url()?))?;

    let mut request = AgentRequest::new(&args.method, url);
    request.navigation = navigate;
    if navigate && !request.is_get() {
        bail!("navigations must use GET, got {}", request.method);
    }

    for raw in &args.headers {
        let Some((name, value)) = parse_header(raw) else { bail!("invalid header {raw:?}, expected `name: value`") };
        request = request.with_header(name, value);
    }
    if let Some(data) = &args.data {
        request = request.with_body(data.as_bytes());
    }

    Ok(request)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
