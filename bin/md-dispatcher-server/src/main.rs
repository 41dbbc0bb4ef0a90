//! Message Dispatcher Server
//!
//! Wires the message store, idempotency cache and delivery gateway into the
//! dispatch engine, serves the operator API, and starts polling once the
//! listener is bound.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use axum::{routing::get, Router};
use md_config::{AppConfig, DatabaseConfig, PollerConfig, RedisConfig};
use md_dispatch::api::{create_router, AppState, AuthConfig, AuthMode, AuthState};
use md_dispatch::{
    DispatchOrchestrator, HttpDeliveryGateway, HttpGatewayConfig, IdempotencyCache,
    InMemoryIdempotencyCache, InMemoryMessageStore, MessagePoller, MessageStore,
    MySqlMessageStore, OrchestratorConfig, RedisIdempotencyCache, SentMessageLister,
    SqliteMessageStore, IDEMPOTENCY_KEY_PREFIX,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    md_common::logging::init_logging("md-dispatcher-server");

    info!("Starting Message Dispatcher");

    let config = AppConfig::load()?;
    info!(
        database = %config.store_backend(),
        cache = %config.cache_backend(),
        poll_interval_secs = config.poller.poll_interval_secs,
        auto_start = config.poller.auto_start,
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;
    describe_metrics();

    if config.dev_mode {
        warn!("Dev mode enabled; using in-memory store and cache");
    }
    let store = build_store(config.store_backend(), &config.database).await?;
    let cache = build_cache(config.cache_backend(), &config.redis).await?;

    let gateway = Arc::new(HttpDeliveryGateway::new(HttpGatewayConfig {
        base_url: config.gateway.base_url.clone(),
        api_key: config.gateway.api_key.clone(),
        api_key_header: config.gateway.api_key_header.clone(),
        connect_timeout: config.gateway.connect_timeout(),
        request_timeout: config.gateway.request_timeout(),
    })?);

    let orchestrator = Arc::new(DispatchOrchestrator::new(
        store.clone(),
        cache,
        gateway,
        OrchestratorConfig {
            key_prefix: IDEMPOTENCY_KEY_PREFIX.to_string(),
            marker_ttl: config.poller.idempotency_ttl(),
            concurrency: config.poller.concurrency,
        },
    ));
    let poller = Arc::new(MessagePoller::new(orchestrator, config.poller.poll_interval()));
    let lister = Arc::new(SentMessageLister::new(store));

    let auth = auth_config(&config)?;
    let app = create_router(AppState { poller: poller.clone(), lister }, AuthState::new(auth))
        .merge(metrics_router(metrics_handle));

    let host: std::net::IpAddr = config
        .http
        .host
        .parse()
        .with_context(|| format!("invalid http host: {}", config.http.host))?;
    let addr = SocketAddr::new(host, config.http.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(?addr, "HTTP server listening");

    on_ready(&poller, &config.poller).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(poller))
        .await?;

    info!("Message Dispatcher stopped");
    Ok(())
}

/// Runs once the listener is bound, so the API is reachable before the
/// first cycle starts.
async fn on_ready(poller: &MessagePoller, config: &PollerConfig) -> anyhow::Result<()> {
    if config.auto_start {
        poller.start().await?;
    } else {
        info!("Poller auto-start disabled; start it via POST /messaging/action/start");
    }
    Ok(())
}

async fn build_store(backend: &str, config: &DatabaseConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match backend {
        "mysql" => {
            let pool = MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await
                .context("failed to connect to MySQL")?;
            info!("Connected to MySQL message store");
            Arc::new(MySqlMessageStore::new(pool))
        }
        "sqlite" => {
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.url)
                .await
                .context("failed to open SQLite database")?;
            info!(url = %config.url, "Opened SQLite message store");
            Arc::new(SqliteMessageStore::new(pool))
        }
        "memory" => {
            warn!("Using in-memory message store; messages are lost on restart");
            Arc::new(InMemoryMessageStore::new())
        }
        other => bail!("unsupported database type: {}", other),
    };

    if config.init_schema {
        store.init_schema().await?;
    }

    Ok(store)
}

async fn build_cache(backend: &str, config: &RedisConfig) -> anyhow::Result<Arc<dyn IdempotencyCache>> {
    match backend {
        "redis" => {
            let cache = RedisIdempotencyCache::connect(&config.url)
                .await
                .context("failed to connect to Redis")?;
            Ok(Arc::new(cache))
        }
        "memory" => {
            warn!("Using in-memory idempotency cache; markers are lost on restart");
            Ok(Arc::new(InMemoryIdempotencyCache::new()))
        }
        other => bail!("unsupported cache type: {}", other),
    }
}

fn auth_config(config: &AppConfig) -> anyhow::Result<AuthConfig> {
    let mode = AuthMode::from_config_value(&config.auth.mode)
        .ok_or_else(|| anyhow!("unsupported auth mode: {}", config.auth.mode))?;

    Ok(match mode {
        AuthMode::None => {
            warn!("API authentication disabled");
            AuthConfig::none()
        }
        AuthMode::Basic => AuthConfig::basic(
            config.auth.current_credentials.clone(),
            config.auth.previous_credentials.clone(),
        ),
    })
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

fn describe_metrics() {
    metrics::describe_counter!("dispatcher.cycles_total", "Dispatch cycles started");
    metrics::describe_counter!("dispatcher.fetch_errors_total", "Cycles aborted because pending messages could not be fetched");
    metrics::describe_counter!("dispatcher.messages.sent_total", "Messages delivered by the gateway");
    metrics::describe_counter!("dispatcher.messages.recovered_total", "Messages marked sent from an idempotency marker");
    metrics::describe_counter!("dispatcher.messages.failed_total", "Messages marked failed");
    metrics::describe_counter!("dispatcher.cache.write_errors_total", "Idempotency markers that could not be written");
    metrics::describe_counter!("dispatcher.store.write_errors_total", "Status updates that could not be written");
    metrics::describe_gauge!("dispatcher.pending_messages", "Pending messages fetched by the last cycle");
}

async fn shutdown_signal(poller: Arc<MessagePoller>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, waiting for in-flight dispatch cycle");
    poller.stop().await;
}
