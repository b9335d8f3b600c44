//! pulse-api - HTTP API server for the pulse live dashboard

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_api::{build_router, rate_limit, AppState};
use pulse_core::defaults::{POOL_METRICS_INTERVAL_SECS, SERVER_PORT, SESSION_SWEEP_INTERVAL_SECS};
use pulse_core::ChangeFeed;
use pulse_db::{log_pool_metrics, Database, ListenerHandle, MemoryStore, PoolConfig};
use pulse_live::{Backend, SessionConfig};

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors
///   RUST_LOG    - standard env filter (default: "pulse_api=debug,pulse_live=info,tower_http=debug")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pulse_api=debug,pulse_live=info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("pulse-api.log");
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// Background work tied to the PostgreSQL backend.
struct PgTasks {
    listener: ListenerHandle,
    pool_metrics: tokio::task::JoinHandle<()>,
}

/// Storage and push channel for the selected backend.
async fn open_backend(feed: Arc<ChangeFeed>) -> anyhow::Result<(Backend, Option<PgTasks>)> {
    let kind = std::env::var("PULSE_BACKEND").unwrap_or_else(|_| "postgres".to_string());
    match kind.as_str() {
        "memory" => {
            info!(subsystem = "api", backend = "memory", "Using in-memory backend");
            let store = Arc::new(MemoryStore::new(feed.clone()));
            Ok((Backend::from_store(store, feed), None))
        }
        "postgres" => {
            let database_url = std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/pulse".to_string());
            let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
            db.migrate().await?;
            info!(subsystem = "api", backend = "postgres", "Database ready");
            let listener = db.listen(feed.clone()).await?;
            let pool = db.pool.clone();
            let pool_metrics = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                    POOL_METRICS_INTERVAL_SECS,
                ));
                loop {
                    ticker.tick().await;
                    log_pool_metrics(&pool);
                }
            });
            let backend = Backend {
                notifications: db.notifications.clone(),
                events: db.events.clone(),
                alerts: db.alerts.clone(),
                audit: db.audit.clone(),
                roles: db.roles.clone(),
                realtime: feed,
            };
            Ok((backend, Some(PgTasks { listener, pool_metrics })))
        }
        other => anyhow::bail!("unknown PULSE_BACKEND '{}', expected postgres or memory", other),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(SERVER_PORT);

    let feed = Arc::new(ChangeFeed::default());
    let (backend, pg_tasks) = open_backend(feed.clone()).await?;
    let config = SessionConfig::from_env();
    info!(
        window_capacity = config.window_capacity,
        page_size = config.page_size,
        resync_interval_secs = config.resync_interval.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Session configuration loaded"
    );

    let state = AppState::new(backend, feed, config).with_rate_limiter(rate_limit::limiter_from_env());
    let sessions = state.sessions.clone();
    let sweeper = sessions.spawn_sweeper(std::time::Duration::from_secs(SESSION_SWEEP_INTERVAL_SECS));
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    sessions.shutdown_all().await;
    if let Some(tasks) = pg_tasks {
        tasks.pool_metrics.abort();
        tasks.listener.shutdown().await?;
    }
    info!("Server stopped");
    Ok(())
}
