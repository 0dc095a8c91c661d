//! # Predictor History Relay
//!
//! Keeps one WebSocket session open to the predictor feed, folds the
//! `[house, [values]]` deliveries into a bounded per-house history, and
//! serves that history over a small read-only HTTP API:
//!
//! - `GET /api/history/{house}`: one house (`placard`, `bet888`, `betway`).
//! - `GET /api/history`: every house.
//! - `GET /api/status`: upstream liveness and the last value per house.
//! - `GET /health`
//!
//! Configuration comes from built-in defaults, `server_history.conf`, the
//! environment (a `.env` file is honoured) and the command line, in that
//! order of precedence.

use std::sync::Arc;

use anyhow::{Context, Result};
use lib_common::core::{HistoryQuery, HistoryStore};
use lib_common::ingestors::PredictorWssIngestor;
use lib_common::loggers::{LoggerLocal, LoggerLocalOptions};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod history_logic;
use history_logic::{config, downstream};

const APP_NAME: &str = "server_history";

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = match config::load_config() {
        Ok(config) => config,
        Err(config::ConfigError::Cli(e)) => e.exit(),
        Err(e) => return Err(e).context("invalid configuration"),
    };

    let _log_guard = LoggerLocal::init(
        APP_NAME,
        &LoggerLocalOptions {
            use_tty: true,
            use_file: config.server.log_to_file,
            log_dir: Some(config.server.log_dir.clone()),
            level: config.server.log_level.clone(),
        },
    )?;
    match &config.config_file {
        Some(path) => info!("Loaded config file {}", path.display()),
        None => info!(
            "No config file at {}. Using defaults and environment/CLI variables.",
            config::DEFAULT_CONFIG_FILE
        ),
    }

    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let store = Arc::new(HistoryStore::new());
    let ingestor = PredictorWssIngestor::new(config.predictor.clone(), Arc::clone(&store));
    let query = Arc::new(HistoryQuery::new(Arc::clone(&store), ingestor.state()));

    let shutdown = CancellationToken::new();
    let upstream_handle = tokio::spawn(ingestor.run(shutdown.clone()));
    let mut downstream_handle = tokio::spawn(downstream::run(
        config.server.port,
        query,
        shutdown.clone(),
    ));

    let finished_early = tokio::select! {
        _ = shutdown_signal() => None,
        res = &mut downstream_handle => Some(res),
    };

    shutdown.cancel();

    let downstream_result = match finished_early {
        Some(res) => res,
        None => downstream_handle.await,
    };
    upstream_handle.await.context("predictor ingestor task failed")?;
    downstream_result
        .context("history API task failed")?
        .context("history API stopped with an error")?;

    info!("Shutdown complete.");
    Ok(())
}

/// Resolves on the first of Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, initiating shutdown."),
            Err(e) => {
                error!("Failed to install Ctrl-C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
