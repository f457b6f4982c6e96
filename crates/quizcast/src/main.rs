//! Quizcast server binary.
//!
//! This is the composition root: it loads configuration, connects to
//! `PostgreSQL`, builds the shared state and serves the API until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `quizcast-config.yaml` (or `QUIZCAST_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL`, run migrations and ping; any failure here
//!    is fatal
//! 4. Build the application state
//! 5. Spawn the liveness monitor and the rate-limit janitor
//! 6. Serve HTTP and `WebSocket` traffic
//! 7. On shutdown, stop the background tasks and close the pool

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use quizcast_core::config::{LogFormat, LoggingConfig};
use quizcast_core::{QuizcastConfig, SystemClock};
use quizcast_db::{PostgresConfig, PostgresPool, Store};
use quizcast_server::{start_server, AppState};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "quizcast-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the database is
/// unreachable at startup, or the server cannot bind.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("quizcast starting");
    info!(
        host = config.server.host,
        port = config.server.port,
        max_ws_connections = config.realtime.max_connections,
        query_timeout_ms = config.database.query_timeout_ms,
        "Configuration loaded"
    );

    // 3. Connect to PostgreSQL.
    let db_config = PostgresConfig::new(&config.database.url)
        .with_max_connections(config.database.max_connections)
        .with_connect_timeout(config.database.connect_timeout())
        .with_statement_timeout(config.database.query_timeout());
    let pool = PostgresPool::connect(&db_config).await?;
    pool.run_migrations().await?;
    pool.ping().await?;
    info!("Database ready");

    // 4. Build the application state.
    let store = Store::postgres(pool.clone()).with_query_timeout(config.database.query_timeout());
    let state = Arc::new(AppState::new(
        store,
        &config.realtime,
        &config.rate_limit,
        Arc::new(SystemClock),
    ));

    // 5. Background tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let liveness = tokio::spawn(state.liveness_monitor().run(shutdown_rx.clone()));
    let janitor = {
        let admission = Arc::clone(&state.admission);
        tokio::spawn(async move { admission.run_janitor(shutdown_rx).await })
    };
    info!(
        ping_interval_secs = config.realtime.ping_interval_secs,
        sweep_interval_secs = config.realtime.sweep_interval_secs,
        stale_after_secs = config.realtime.stale_after_secs,
        "Background tasks started"
    );

    // 6. Serve.
    let served = start_server(&config.server, state, shutdown_signal()).await;

    // 7. Shut down.
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Background tasks already stopped");
    }
    for (name, task) in [("liveness", liveness), ("janitor", janitor)] {
        if let Err(e) = task.await {
            tracing::warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }
    pool.close().await;
    served?;

    info!("quizcast shutdown complete");
    Ok(())
}

/// Load configuration from `QUIZCAST_CONFIG` or `quizcast-config.yaml`.
///
/// A missing file means defaults (still subject to environment
/// overrides and validation).
fn load_config() -> Result<QuizcastConfig, AppError> {
    let path = std::env::var_os("QUIZCAST_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(QuizcastConfig::from_file(&path)?)
    } else {
        Ok(QuizcastConfig::parse("")?)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Resolve on `Ctrl-C`.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
