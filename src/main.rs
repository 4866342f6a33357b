mod config;
mod db;
mod error;
mod middleware;
mod models;
mod redis;
mod routes;
mod services;
mod tasks;
mod utils;

use std::sync::Arc;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::bridge_client::BridgeClient;
use crate::services::exit_signal::HttpExitSignalGenerator;
use crate::services::notification::NullNotifier;
use crate::services::order_cache::OrderLru;
use crate::services::position_monitor::PositionMonitor;
use crate::services::position_registry::PositionRegistry;
use crate::services::symbol_mapper::IdentitySymbolMapper;

/// Shared application state accessible in all handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: db::Pool,
    pub redis: redis::RedisPool,
    pub bridge: BridgeClient,
    pub monitor: PositionMonitor,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mt4_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!("starting MT4 execution and position-monitor core on {}", config.addr());

    let db_pool = db::connect(&config).await;
    tracing::info!("connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run database migrations");
    tracing::info!("database migrations complete");

    let redis_pool = redis::connect(&config).await;
    tracing::info!("connected to Redis");

    // HTTP timeout tuned for scalping: 5s, shared by every bridge call.
    let http_client = reqwest::Client::builder()
        .timeout(config.mt4_http_timeout())
        .pool_max_idle_per_host(10)
        .build()
        .expect("failed to create HTTP client");

    let config = Arc::new(config);

    // Symbol Mapper is an external collaborator; the
    // identity mapper is the development fallback documented in
    // `symbol_mapper.rs` -- production deployments wire the real
    // universal-symbol ↔ broker-symbol lookup service here.
    let symbol_mapper = Arc::new(IdentitySymbolMapper);
    let order_lru = Arc::new(OrderLru::new());

    let bridge = BridgeClient::new(
        http_client.clone(),
        redis_pool.clone(),
        config.clone(),
        symbol_mapper,
        order_lru,
    );

    let registry = Arc::new(PositionRegistry::new());
    let exit_signal_generator = Arc::new(HttpExitSignalGenerator::new(http_client.clone(), config.exit_signal_url.clone()));
    let notifier = Arc::new(NullNotifier);

    let monitor = PositionMonitor::new(bridge.clone(), db_pool.clone(), registry, exit_signal_generator, notifier);

    let state = AppState {
        config: config.clone(),
        db: db_pool,
        redis: redis_pool,
        bridge,
        monitor,
    };

    // Order Poller tasks are spawned ad hoc by `BridgeClient::create_market_order`;
    // the only recurring background task wired here is the Position Monitor's
    // 60s scheduler.
    tasks::spawn_all(state.clone());

    let metrics_handle = setup_metrics();

    let app = Router::new()
        .merge(routes::health::router())
        .route("/metrics", axum::routing::get(move || async move { metrics_handle.render() }))
        .layer(middleware::security::SecurityHeadersLayer)
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .expect("failed to bind");

    tracing::info!("listening on {}", config.addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

fn setup_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder.install_recorder().expect("failed to install Prometheus recorder")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
