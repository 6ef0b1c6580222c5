//! Fetch strategies.
//!
//! Each route category maps to one strategy:
//!
//! | Category     | Strategy       | Write-back store |
//! |--------------|----------------|------------------|
//! | navigation   | network-first  | dynamic          |
//! | remote-data  | network-first  | dynamic          |
//! | static-asset | cache-first    | static           |
//! | other        | network-only   | none             |
//!
//! Only 2xx responses are written back, and the write is awaited before the
//! response is handed to the caller. Strategies never delete entries.

use harrow_core::{AgentRequest, CapturedResponse, Category, Entry, Error, StoreHandle};
use serde::Serialize;

use crate::generation::GenerationStores;
use crate::state::AgentState;

const OFFLINE_HTML: &str = "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page is not available offline. Reconnect and try again.</p></body></html>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Network, then the dynamic store; navigations end at the offline page.
    NetworkFirst,
    /// Static store, then network.
    CacheFirst,
    /// Network, then any current store.
    NetworkOnly,
}

impl Strategy {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Navigation | Category::RemoteData => Strategy::NetworkFirst,
            Category::StaticAsset => Strategy::CacheFirst,
            Category::Other => Strategy::NetworkOnly,
        }
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Network,
    Cache,
    OfflinePlaceholder,
}

/// A response handed back to the host, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentResponse {
    pub response: CapturedResponse,
    pub source: ResponseSource,
    /// Store the response was read from, for cache hits.
    pub store: Option<String>,
}

impl AgentResponse {
    pub fn network(response: CapturedResponse) -> Self {
        Self { response, source: ResponseSource::Network, store: None }
    }

    fn cached(store: &StoreHandle, entry: Entry) -> Self {
        Self { response: entry.response, source: ResponseSource::Cache, store: Some(store.name().to_string()) }
    }
}

/// Run the strategy for `category` against the given generation's stores.
pub async fn execute(
    state: &AgentState, stores: &GenerationStores, category: Category, request: &AgentRequest,
) -> Result<AgentResponse, Error> {
    let strategy = Strategy::for_category(category);
    tracing::debug!(url = %request.url, ?category, ?strategy, "executing strategy");

    match strategy {
        Strategy::NetworkFirst => network_first(state, stores, request, category == Category::Navigation).await,
        Strategy::CacheFirst => cache_first(state, &stores.static_store, request).await,
        Strategy::NetworkOnly => network_only(state, stores, request).await,
    }
}

async fn network_first(
    state: &AgentState, stores: &GenerationStores, request: &AgentRequest, navigation: bool,
) -> Result<AgentResponse, Error> {
    let err = match state.transport.send(request).await {
        Ok(response) => {
            write_back(state, &stores.dynamic_store, request, &response).await;
            return Ok(AgentResponse::network(response));
        }
        Err(e) => e,
    };

    tracing::debug!(url = %request.url, error = %err, "network failed, trying dynamic store");

    if let Some((store, entry)) = lookup(state, &[&stores.dynamic_store], &request.cache_key()).await {
        return Ok(AgentResponse::cached(&store, entry));
    }

    if navigation {
        return Ok(offline_placeholder(state, stores).await);
    }

    Err(err)
}

async fn cache_first(state: &AgentState, store: &StoreHandle, request: &AgentRequest) -> Result<AgentResponse, Error> {
    if let Some((store, entry)) = lookup(state, &[store], &request.cache_key()).await {
        tracing::debug!(url = %request.url, store = %store.name(), "cache hit");
        return Ok(AgentResponse::cached(&store, entry));
    }

    tracing::debug!(url = %request.url, "cache miss, fetching");
    let response = state.transport.send(request).await?;
    write_back(state, store, request, &response).await;
    Ok(AgentResponse::network(response))
}

async fn network_only(
    state: &AgentState, stores: &GenerationStores, request: &AgentRequest,
) -> Result<AgentResponse, Error> {
    match state.transport.send(request).await {
        Ok(response) => Ok(AgentResponse::network(response)),
        Err(err) => {
            let key = request.cache_key();
            match lookup(state, &[&stores.static_store, &stores.dynamic_store], &key).await {
                Some((store, entry)) => Ok(AgentResponse::cached(&store, entry)),
                None => Err(err),
            }
        }
    }
}

/// Fallback lookup. A store read failure counts as a miss so the caller's
/// original network error is what propagates.
async fn lookup(state: &AgentState, stores: &[&StoreHandle], key: &str) -> Option<(StoreHandle, Entry)> {
    match state.db.find_in_stores(stores, key).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(key, error = %e, "cache lookup failed");
            None
        }
    }
}

async fn write_back(state: &AgentState, store: &StoreHandle, request: &AgentRequest, response: &CapturedResponse) {
    if !response.is_success() {
        tracing::debug!(url = %request.url, status = response.status, "not caching non-success response");
        return;
    }

    let entry = Entry::capture(request, response);
    if let Err(e) = state.db.put_entry(store, &request.cache_key(), &entry).await {
        tracing::warn!(url = %request.url, store = %store.name(), error = %e, "cache write-back failed");
    }
}

/// The configured offline page from the static store, or a built-in page.
async fn offline_placeholder(state: &AgentState, stores: &GenerationStores) -> AgentResponse {
    let cached = match state.resolve(&state.config.offline_url) {
        Ok(url) => lookup(state, &[&stores.static_store], &AgentRequest::get(url).cache_key()).await,
        Err(e) => {
            tracing::warn!(error = %e, "offline_url does not resolve");
            None
        }
    };

    let response = match cached {
        Some((_, entry)) => entry.response,
        None => CapturedResponse::new(503, OFFLINE_HTML).with_header("content-type", "text/html; charset=utf-8"),
    };

    AgentResponse { response, source: ResponseSource::OfflinePlaceholder, store: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use harrow_core::{AgentConfig, CacheDb};
    use std::sync::Arc;
    use url::Url;

    const ORIGIN: &str = "https://farm.example";

    struct Fixture {
        state: AgentState,
        stores: GenerationStores,
        transport: Arc<ScriptedTransport>,
    }

    async fn fixture() -> Fixture {
        let config = AgentConfig { origin: ORIGIN.into(), ..Default::default() };
        let db = CacheDb::open_in_memory().await.unwrap();
        let stores = GenerationStores::for_version(&config, "v1");
        db.open_store(stores.static_store.name()).await.unwrap();
        db.open_store(stores.dynamic_store.name()).await.unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let state = AgentState::new(config, db, transport.clone()).unwrap();
        Fixture { state, stores, transport }
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("{ORIGIN}{path}")).unwrap()
    }

    async fn run(f: &Fixture, category: Category, request: &AgentRequest) -> Result<AgentResponse, Error> {
        execute(&f.state, &f.stores, category, request).await
    }

    async fn seed(f: &Fixture, store: &StoreHandle, path: &str, body: &str) {
        let request = AgentRequest::get(url(path));
        let entry = Entry::capture(&request, &CapturedResponse::new(200, body));
        f.state.db.put_entry(store, &request.cache_key(), &entry).await.unwrap();
    }

    #[test]
    fn test_strategy_for_category() {
        assert_eq!(Strategy::for_category(Category::Navigation), Strategy::NetworkFirst);
        assert_eq!(Strategy::for_category(Category::RemoteData), Strategy::NetworkFirst);
        assert_eq!(Strategy::for_category(Category::StaticAsset), Strategy::CacheFirst);
        assert_eq!(Strategy::for_category(Category::Other), Strategy::NetworkOnly);
    }

    #[tokio::test]
    async fn test_cache_first_hit_skips_network() {
        let f = fixture().await;
        seed(&f, &f.stores.static_store, "/shell.js", "cached").await;
        f.transport.respond(url("/shell.js").as_str(), 200, "live");

        let response = run(&f, Category::StaticAsset, &AgentRequest::get(url("/shell.js"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.response.text(), "cached");
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let f = fixture().await;
        f.transport.respond(url("/app.css").as_str(), 200, "body{}");
        let request = AgentRequest::get(url("/app.css"));

        let response = run(&f, Category::StaticAsset, &request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);

        let entry = f.state.db.get_entry(&f.stores.static_store, &request.cache_key()).await.unwrap();
        assert_eq!(entry.unwrap().response.text(), "body{}");
    }

    #[tokio::test]
    async fn test_cache_first_offline_miss_propagates() {
        let f = fixture().await;
        f.transport.set_offline(true);

        let err = run(&f, Category::StaticAsset, &AgentRequest::get(url("/logo.png"))).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_navigation_success_writes_dynamic_store() {
        let f = fixture().await;
        f.transport.respond(url("/articles").as_str(), 200, "<h1>articles</h1>");
        let request = AgentRequest::navigate(url("/articles"));

        let response = run(&f, Category::Navigation, &request).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);
        assert!(f.state.db.get_entry(&f.stores.dynamic_store, &request.cache_key()).await.unwrap().is_some());
        assert!(f.state.db.get_entry(&f.stores.static_store, &request.cache_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_navigation_offline_uses_dynamic_entry() {
        let f = fixture().await;
        seed(&f, &f.stores.dynamic_store, "/articles", "stale articles").await;
        f.transport.set_offline(true);

        let response = run(&f, Category::Navigation, &AgentRequest::navigate(url("/articles"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.response.text(), "stale articles");
        assert_eq!(response.store.as_deref(), Some(f.stores.dynamic_store.name()));
    }

    #[tokio::test]
    async fn test_navigation_offline_serves_cached_offline_page() {
        let f = fixture().await;
        seed(&f, &f.stores.static_store, "/offline.html", "<p>offline shell</p>").await;
        f.transport.set_offline(true);

        let response = run(&f, Category::Navigation, &AgentRequest::navigate(url("/never-seen"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::OfflinePlaceholder);
        assert_eq!(response.response.text(), "<p>offline shell</p>");
    }

    #[tokio::test]
    async fn test_navigation_offline_builtin_placeholder() {
        let f = fixture().await;
        f.transport.set_offline(true);

        let response = run(&f, Category::Navigation, &AgentRequest::navigate(url("/never-seen"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::OfflinePlaceholder);
        assert_eq!(response.response.status, 503);
        assert!(response.response.text().contains("offline"));
    }

    #[tokio::test]
    async fn test_remote_data_offline_without_entry_propagates() {
        let f = fixture().await;
        f.transport.set_offline(true);

        let err = run(&f, Category::RemoteData, &AgentRequest::get(url("/rest/v1/articles"))).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_non_success_not_written_back() {
        let f = fixture().await;
        f.transport.respond(url("/rest/v1/articles").as_str(), 500, "boom");
        let request = AgentRequest::get(url("/rest/v1/articles"));

        let response = run(&f, Category::RemoteData, &request).await.unwrap();
        assert_eq!(response.response.status, 500);
        assert!(f.state.db.get_entry(&f.stores.dynamic_store, &request.cache_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_only_does_not_write() {
        let f = fixture().await;
        f.transport.respond(url("/about").as_str(), 200, "about");
        let request = AgentRequest::get(url("/about"));

        run(&f, Category::Other, &request).await.unwrap();
        assert!(f.state.db.find_in_stores(&[&f.stores.static_store, &f.stores.dynamic_store], &request.cache_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_only_falls_back_to_any_store() {
        let f = fixture().await;
        seed(&f, &f.stores.static_store, "/manifest.json", "{}").await;
        seed(&f, &f.stores.dynamic_store, "/about", "about page").await;
        f.transport.set_offline(true);

        let response = run(&f, Category::Other, &AgentRequest::get(url("/manifest.json"))).await.unwrap();
        assert_eq!(response.store.as_deref(), Some(f.stores.static_store.name()));

        let response = run(&f, Category::Other, &AgentRequest::get(url("/about"))).await.unwrap();
        assert_eq!(response.store.as_deref(), Some(f.stores.dynamic_store.name()));

        let err = run(&f, Category::Other, &AgentRequest::get(url("/contact"))).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
