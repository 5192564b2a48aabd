//! Server assembly: tracing, database pool, router, and the run loop.

use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use axum::{
    Extension, Router,
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use relay_shared::config::server::{Config, LogFormat};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::{self, MessageStore, PgMessageLog},
    handlers::socket,
    relay::{RelayController, RelayHub},
    routes,
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided
/// configuration. Returns the configured level string.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.log_format, LogFormat::Json) {
        let _ = fmt_builder.json().with_ansi(false).try_init();
    } else {
        let _ = fmt_builder.with_ansi(true).try_init();
    }

    config.log_level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given configuration.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(config.db_max_connections));
    Ok(pool)
}

/// Creates the application state with the given database pool.
#[must_use]
pub fn create_app_state(pool: Option<sqlx::PgPool>, config: &Config) -> Arc<AppState> {
    let relay = pool.clone().map(|pool| {
        let store: Arc<dyn MessageStore> =
            Arc::new(PgMessageLog::new(pool, config.relay.replay_limit));
        let hub = Arc::new(RelayHub::new(config.relay.channel_capacity));
        Arc::new(RelayController::new(store, hub))
    });
    Arc::new(AppState { pool, relay })
}

/// Creates the static file service for the entry page.
pub fn create_static_service<S>(static_dir: std::path::PathBuf) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    use axum::routing::get_service;

    let index_path = static_dir.join("index.html");

    Router::new().fallback_service(
        ServeDir::new(static_dir)
            .append_index_html_on_directories(true)
            .fallback(get_service(ServeFile::new(index_path))),
    )
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    let static_files_service = create_static_service(config.static_dir.clone());

    Router::new()
        .route("/ws", get(socket::ws_handler))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(tracer::create_trace_layer())
        .merge(static_files_service)
        .with_state(state)
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the relay server and binds it to the configured port.
///
/// Startup is fail-fast: the database must be reachable and the messages
/// schema in place before the listener starts accepting connections.
///
/// # Errors
/// Returns an error if the database is unreachable, schema creation fails,
/// or the server fails to start.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!("Starting relay server...");

    let metrics_handle = metrics_handle();

    let pool = create_database_pool(&config)
        .await
        .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;

    db::ensure_liveness(&pool)
        .await
        .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;

    let log = PgMessageLog::new(pool.clone(), config.relay.replay_limit);
    log.ensure_schema()
        .await
        .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;

    let state = create_app_state(Some(pool), &config);
    let app = create_app_router(state, &config, metrics_handle.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}
