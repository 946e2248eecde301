use axum::{routing::get, Router};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::gateway::Gateway;
use crate::store::StoreConfig;

mod api;
mod error;
mod gateway;
mod sse;
mod store;
mod stream;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "cc-hub",
    version = "0.1.0",
    about = "Cradle cache: read-only query gateway"
)]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "cc-hub.toml")]
    config: PathBuf,

    /// Server bind address (overrides `server.bind`)
    #[arg(long)]
    bind: Option<String>,

    /// JSON fixture for the memory store (overrides `store.fixture`)
    #[arg(long)]
    fixture: Option<PathBuf>,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Deserialize, Clone)]
struct ServerConfig {
    #[serde(default = "default_bind")]
    bind: String,
    /// Liveness poll interval of streaming requests.
    #[serde(default = "default_alive_delay")]
    check_requests_alive_delay_ms: u64,
    /// Upper bound for REST requests; streams are not bounded.
    #[serde(default = "default_response_timeout")]
    response_timeout_ms: u64,
    /// Frames buffered per stream before the store is paused.
    #[serde(default = "default_stream_buffer")]
    stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            check_requests_alive_delay_ms: default_alive_delay(),
            response_timeout_ms: default_response_timeout(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

#[derive(Deserialize, Clone)]
struct CacheConfig {
    #[serde(default = "default_enable_caching")]
    enable_caching: bool,
    /// Seconds; events and children lookups.
    #[serde(default = "default_not_modified_lifetime")]
    not_modified_objects_lifetime: u64,
    /// Seconds; searches and message lookups.
    #[serde(default = "default_rarely_modified_lifetime")]
    rarely_modified_objects: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_caching: default_enable_caching(),
            not_modified_objects_lifetime: default_not_modified_lifetime(),
            rarely_modified_objects: default_rarely_modified_lifetime(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_alive_delay() -> u64 {
    2000
}
fn default_response_timeout() -> u64 {
    60_000
}
fn default_stream_buffer() -> usize {
    256
}
fn default_enable_caching() -> bool {
    true
}
fn default_not_modified_lifetime() -> u64 {
    3600
}
fn default_rarely_modified_lifetime() -> u64 {
    900
}

fn load_config(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config at {:?}, using defaults", path);
        return Config::default();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| toml::from_str(&content).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
            Config::default()
        }
    }
}

// =============================================================================
// Application State
// =============================================================================

struct AppState {
    gateway: Gateway,
    config: Config,
}

fn router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_millis(state.config.server.response_timeout_ms);

    let rest = Router::new()
        .route("/event/:book/:scope/:id", get(api::get_event))
        .route("/eventChildren", get(api::event_children))
        .route("/searchEvents/:book", get(api::search_events))
        .route("/eventParents/:book/:scope", get(api::event_parents))
        .route("/messageStream", get(api::message_streams))
        .route("/message/:id", get(api::get_message))
        .route("/messageBody/:id", get(api::message_body))
        .route("/attachedEvents/:id", get(api::attached_events))
        .layer(TimeoutLayer::new(timeout));

    let streaming = Router::new().route("/search/sse/messages", get(api::search_messages));

    rest.merge(streaming)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cc_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = load_config(&args.config);
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(fixture) = args.fixture {
        config.store.fixture = Some(fixture);
    }

    let store = match store::open(&config.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match config.server.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {:?}: {}", config.server.bind, e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(AppState {
        gateway: Gateway::new(store),
        config,
    });

    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  cc-hub v0.1.0");
    tracing::info!("  REST:    http://{}/event/{{book}}/{{scope}}/{{id}}", addr);
    tracing::info!("  SSE:     http://{}/search/sse/messages", addr);
    tracing::info!("  Store:   {}", state.gateway.backend());
    tracing::info!(
        "  Caching: {}",
        api::cache_control(&state.config.cache, api::Lifetime::RarelyModified)
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let app = router(state);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.check_requests_alive_delay_ms, 2000);
        assert!(config.cache.enable_caching);
        assert_eq!(config.cache.rarely_modified_objects, 900);
    }

    #[test]
    fn test_config_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            check_requests_alive_delay_ms = 250
            response_timeout_ms = 1000

            [cache]
            enable_caching = false

            [store]
            backend = "memory"
            fixture = "fixtures/cradle.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.check_requests_alive_delay_ms, 250);
        assert_eq!(config.server.response_timeout_ms, 1000);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert!(!config.cache.enable_caching);
        assert_eq!(config.cache.not_modified_objects_lifetime, 3600);
        assert_eq!(
            config.store.fixture.as_deref(),
            Some(Path::new("fixtures/cradle.json"))
        );
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/cc-hub.toml"));
        assert_eq!(config.server.stream_buffer, 256);
    }

    #[test]
    fn test_router_builds() {
        let state = Arc::new(AppState {
            gateway: Gateway::new(Arc::new(store::MemoryStore::default())),
            config: Config::default(),
        });
        let _app = router(state);
    }
}
