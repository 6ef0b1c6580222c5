//! End-to-end agent scenarios driven through the message channel.

use std::sync::Arc;

use harrow_agent::testing::ScriptedTransport;
use harrow_agent::{Agent, AgentHandle, LifecycleState, Notification, ResponseSource};
use harrow_core::{AgentConfig, AgentRequest, CacheDb, Error, StoreHandle};
use tokio::task::JoinHandle;
use url::Url;

const ORIGIN: &str = "https://farm.example";

fn url(path: &str) -> Url {
    Url::parse(&format!("{ORIGIN}{path}")).unwrap()
}

fn config() -> AgentConfig {
    config_for("v1")
}

fn config_for(version: &str) -> AgentConfig {
    AgentConfig {
        origin: ORIGIN.into(),
        version: version.into(),
        shell_manifest: vec!["/".into(), "/shell.js".into()],
        ..Default::default()
    }
}

fn shell_transport() -> Arc<ScriptedTransport> {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(url("/").as_str(), 200, "<html>shell</html>").respond(url("/shell.js").as_str(), 200, "boot()");
    transport
}

async fn start(db: CacheDb, transport: Arc<ScriptedTransport>) -> (AgentHandle, JoinHandle<()>) {
    Agent::spawn(config(), db, transport).unwrap()
}

#[tokio::test]
async fn install_success_waits_then_activates_with_two_shell_entries() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let (agent, _task) = start(db.clone(), shell_transport()).await;
    let mut events = agent.subscribe();

    assert_eq!(agent.boot().await.unwrap(), LifecycleState::Active);
    assert_eq!(events.recv().await.unwrap(), Notification::GenerationWaiting { version: "v1".into() });
    assert_eq!(events.recv().await.unwrap(), Notification::GenerationActivated { version: "v1".into() });

    let keys = db.list_keys(&StoreHandle::named("harrow-static-v1")).await.unwrap();
    assert_eq!(keys.len(), 2);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn install_with_404_never_activates_and_keeps_previous_stores() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let transport = shell_transport();
    let (agent, _task) = start(db.clone(), transport.clone()).await;
    agent.boot().await.unwrap();
    let before = db.store_stats().await.unwrap();

    let err = agent.install("v2", vec!["/".into(), "/gone.css".into()]).await.unwrap_err();
    assert!(matches!(err, Error::InstallFailed(_)));

    let status = agent.status().await.unwrap();
    assert_eq!(status.active.unwrap().version, "v1");
    assert!(status.waiting.is_none());
    assert_eq!(db.store_stats().await.unwrap(), before);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn activation_leaves_only_current_store_names() {
    let db = CacheDb::open_in_memory().await.unwrap();
    db.open_store("harrow-static-v0").await.unwrap();
    db.open_store("harrow-dynamic-v0").await.unwrap();
    let (agent, _task) = start(db.clone(), shell_transport()).await;

    agent.boot().await.unwrap();
    assert_eq!(db.list_store_names().await.unwrap(), ["harrow-dynamic-v1", "harrow-static-v1"]);

    assert_eq!(agent.install("v2", vec!["/".into()]).await.unwrap(), LifecycleState::Waiting);
    assert_eq!(db.list_store_names().await.unwrap().len(), 4);

    assert_eq!(agent.skip_waiting().await.unwrap(), LifecycleState::Active);
    assert_eq!(db.list_store_names().await.unwrap(), ["harrow-dynamic-v2", "harrow-static-v2"]);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn static_asset_served_from_cache_without_network() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let transport = shell_transport();
    let (agent, _task) = start(db, transport.clone()).await;
    agent.boot().await.unwrap();
    let installs = transport.call_count(url("/shell.js").as_str());

    let response = agent.fetch(AgentRequest::get(url("/shell.js"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.response.text(), "boot()");
    assert_eq!(transport.call_count(url("/shell.js").as_str()), installs);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn remote_data_cached_then_served_offline() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let transport = shell_transport();
    let articles = "https://x.supabase.co/rest/v1/articles?select=*";
    transport.respond(articles, 200, r#"[{"id":1}]"#);
    let (agent, _task) = start(db, transport.clone()).await;
    agent.boot().await.unwrap();

    let request = AgentRequest::get(Url::parse(articles).unwrap());
    assert_eq!(agent.fetch(request.clone()).await.unwrap().source, ResponseSource::Network);

    transport.set_offline(true);
    let response = agent.fetch(request).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.response.text(), r#"[{"id":1}]"#);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn navigation_offline_never_surfaces_an_error() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let transport = shell_transport();
    let (agent, _task) = start(db, transport.clone()).await;
    agent.boot().await.unwrap();

    transport.set_offline(true);
    let response = agent.fetch(AgentRequest::navigate(url("/fact-check/42"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::OfflinePlaceholder);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn offline_post_queued_then_replayed_on_reconnect() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let transport = shell_transport();
    let reports = "https://x.supabase.co/rest/v1/reports";
    transport.respond(reports, 201, "");
    let (agent, _task) = start(db, transport.clone()).await;
    agent.boot().await.unwrap();
    let mut events = agent.subscribe();

    transport.set_offline(true);
    let post = AgentRequest::new("POST", Url::parse(reports).unwrap()).with_body(r#"{"claim":"urea burns roots"}"#);
    assert!(matches!(agent.fetch(post).await, Err(Error::QueuedForRetry(_))));
    assert_eq!(agent.status().await.unwrap().pending_retries, 1);

    transport.set_offline(false);
    let report = agent.connectivity_restored().await.unwrap();
    assert_eq!(report.replayed, 1);
    assert_eq!(agent.status().await.unwrap().pending_retries, 0);
    assert_eq!(events.recv().await.unwrap(), Notification::RetryReplayed { replayed: 1, retained: 0, skipped: 0 });
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn retry_tasks_and_generation_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harrow.sqlite");
    let reports = "https://x.supabase.co/rest/v1/reports";

    {
        let transport = shell_transport();
        let (agent, task) = start(CacheDb::open(&path).await.unwrap(), transport.clone()).await;
        agent.boot().await.unwrap();
        transport.set_offline(true);
        let post = AgentRequest::new("POST", Url::parse(reports).unwrap()).with_body("{}");
        assert!(agent.fetch(post).await.is_err());
        agent.shutdown().await.unwrap();
        task.await.unwrap();
    }

    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(reports, 200, "");
    let (agent, _task) = start(CacheDb::open(&path).await.unwrap(), transport.clone()).await;

    assert_eq!(agent.boot().await.unwrap(), LifecycleState::Active);
    assert_eq!(transport.calls().len(), 0, "restored generation must not refetch the shell");
    assert_eq!(agent.status().await.unwrap().pending_retries, 1);
    assert_eq!(agent.connectivity_restored().await.unwrap().replayed, 1);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn pre_cache_fills_dynamic_store() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let transport = shell_transport();
    transport.respond(url("/articles/soil").as_str(), 200, "soil");
    let (agent, _task) = start(db.clone(), transport.clone()).await;
    agent.boot().await.unwrap();

    let report = agent.pre_cache(vec!["/articles/soil".into()]).await.unwrap();
    assert_eq!(report.cached, 1);

    transport.set_offline(true);
    let response = agent.fetch(AgentRequest::navigate(url("/articles/soil"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.response.text(), "soil");
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn manual_sweep_runs_over_all_stores() {
    let db = CacheDb::open_in_memory().await.unwrap();
    let (agent, _task) = start(db, shell_transport()).await;
    agent.boot().await.unwrap();

    let report = agent.sweep().await.unwrap();
    assert_eq!(report.stores, 2);
    assert_eq!(report.evicted, 0);
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn offline_restart_with_new_version_keeps_serving_previous_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harrow.sqlite");

    {
        let transport = shell_transport();
        transport.respond(url("/articles").as_str(), 200, "<html>articles</html>");
        let (agent, task) = start(CacheDb::open(&path).await.unwrap(), transport).await;
        agent.boot().await.unwrap();
        agent.fetch(AgentRequest::navigate(url("/articles"))).await.unwrap();
        agent.shutdown().await.unwrap();
        task.await.unwrap();
    }

    let transport = Arc::new(ScriptedTransport::new());
    transport.set_offline(true);
    let db = CacheDb::open(&path).await.unwrap();
    let (agent, _task) = Agent::spawn(config_for("v2"), db.clone(), transport).unwrap();

    assert!(matches!(agent.boot().await, Err(Error::InstallFailed(_))));
    let status = agent.status().await.unwrap();
    assert_eq!(status.active.unwrap().version, "v1");
    assert_eq!(db.list_store_names().await.unwrap(), ["harrow-dynamic-v1", "harrow-static-v1"]);

    let response = agent.fetch(AgentRequest::navigate(url("/articles"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.response.text(), "<html>articles</html>");
    agent.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_after_interrupted_install_refetches_shell() {
    let db = CacheDb::open_in_memory().await.unwrap();
    db.open_store("harrow-static-v1").await.unwrap();
    db.open_store("harrow-dynamic-v1").await.unwrap();
    let transport = shell_transport();
    let (agent, _task) = start(db.clone(), transport.clone()).await;

    assert_eq!(agent.boot().await.unwrap(), LifecycleState::Active);
    assert_eq!(transport.calls().len(), 2);
    assert_eq!(db.list_keys(&StoreHandle::named("harrow-static-v1")).await.unwrap().len(), 2);
    agent.shutdown().await.unwrap();
}
