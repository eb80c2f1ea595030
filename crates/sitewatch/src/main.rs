mod auth;
mod cache;
mod config;
mod error;
mod http;
mod index;
mod metrics;
mod model;
mod scrape;
mod state;
mod sync;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use config::{AppConfig, LogFormat, LogOutput};
use error::AppError;
use metrics::MetricsProjector;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Phase 1: basic tracing so config loading itself is observable.
    // Uses set_default (thread-local) so it can be replaced by phase 2's
    // global subscriber once the format/level come from config.
    let _basic_tracing = init_tracing_basic();

    info!("starting sitewatch v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    // Driver-specific config (the `config:` blob's shape, e.g. an
    // unparsable `url`) is only known to each `Source` impl, so it can't be
    // checked by `AppConfig::validate` alone; run it here, before the
    // listener is bound, so it's as fatal as any other config error (spec
    // §4.3, §7).
    scrape::validate_all_sources(&config.sources, Arc::new(MetricsProjector::new()))
        .context("source configuration validation failed")?;

    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!("configuration loaded: {} source(s), {} location(s)", config.sources.len(), config.locations.len());

    let state = AppState::new(config.clone());
    state.initialize();

    if config.server_settings.sync_enable {
        info!("federation /sync endpoint enabled");
    }

    let app = build_router(state.clone());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server_settings.port)
        .parse()
        .context("invalid bind address")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    info!("listening on http://{addr}");
    info!("  - read API:    http://{addr}/api/apps, /api/locations, /api/labels");
    info!("  - metrics:     http://{addr}/metrics");
    info!("  - health:      http://{addr}/healthz, /readyz");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_deadline())
        .await
        .context("server error")?;

    state.shutdown();
    info!("server shut down gracefully");
    Ok(())
}

/// Assemble the full route table (spec §4.8). Every protected route runs
/// the same middleware chain: authentication (the `Principal` extractor,
/// producing a principal or 401) followed by the handler's own
/// authorization filter.
fn build_router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.scraping.timeout.max(5));

    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/readyz", get(http::readyz))
        .route("/metrics", get(http::metrics))
        .route("/sync", get(sync::handle_sync))
        .route("/api/apps", get(http::list_apps))
        .route("/api/locations", get(http::list_locations))
        .route("/api/labels", get(http::list_labels))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(tower_http::timeout::TimeoutLayer::with_status_code(
                    axum::http::StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                ))
                // Every route here is a GET with no meaningful request
                // body; the limit only guards against a misbehaving or
                // hostile client sending an oversized body anyway.
                .layer(DefaultBodyLimit::max(2 * 1024 * 1024)),
        )
        .with_state(state)
}

/// Phase 1: basic tracing init so we can log during config loading.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sitewatch=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: re-initialize tracing with configuration values (format,
/// level, stdout vs. file), replacing the phase-1 thread-local subscriber
/// with the real global one.
fn init_tracing_from_config(config: &AppConfig) {
    use std::sync::Arc;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (format, output) = (&config.logging.format, &config.logging.output);
    match (format, output) {
        (LogFormat::Json, LogOutput::Stdout) => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Json, LogOutput::File { path }) => {
            let file = open_log_file(path);
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true).with_ansi(false).with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::Stdout) => {
            let layer = fmt::layer().with_target(true).with_thread_ids(false).with_file(false).with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::File { path }) => {
            let file = open_log_file(path);
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

fn open_log_file(path: &str) -> std::fs::File {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap_or_else(|e| panic!("failed to open log file '{path}': {e}"))
}

/// Graceful shutdown on SIGINT/SIGTERM, with axum's own 5s in-flight-request
/// drain deadline applied by the caller (spec §5).
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
        _ = ctrl_c => warn!("received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => warn!("received SIGTERM, initiating graceful shutdown..."),
    }
}

/// Waits for `shutdown_signal`, then arms a 5s watchdog: in-flight scrapes
/// and requests finish or are abandoned at that deadline (spec §5). Axum's
/// own graceful-shutdown drain has no built-in timeout, so the deadline is
/// enforced by forcing the process to exit if the drain runs long.
async fn shutdown_signal_with_deadline() {
    shutdown_signal().await;
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        tracing::error!("graceful shutdown exceeded 5s deadline, forcing exit");
        std::process::exit(1);
    });
}
