//! thermolog: Zenoh sensor readings into SQLite, served over HTTP.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use thermolog_common::{ZenohConfig, init_tracing};
use thermolog_server::{ServerConfig, SqliteStore, Supervisor};

/// Sensor reading logger.
#[derive(Parser, Debug)]
#[command(name = "thermolog")]
#[command(about = "Store Zenoh sensor readings in SQLite and serve them over HTTP")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "THERMOLOG_CONFIG")]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long, env = "THERMOLOG_LISTEN")]
    listen: Option<String>,

    /// SQLite database path (overrides config).
    #[arg(long, env = "THERMOLOG_DB")]
    db: Option<String>,

    /// Topic to subscribe to (overrides config).
    #[arg(long, env = "THERMOLOG_TOPIC")]
    topic: Option<String>,

    /// Broker to connect to in client mode, as host:port or a Zenoh locator (overrides config).
    #[arg(long, env = "THERMOLOG_BROKER")]
    broker: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ServerConfig::load_from_file(config_path)?
    } else {
        ServerConfig::default()
    };

    // CLI overrides
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(db) = args.db {
        config.storage.path = db;
    }
    if let Some(topic) = args.topic {
        config.ingest.topic = topic;
    }
    if let Some(broker) = args.broker {
        config.zenoh = ZenohConfig::client(&broker);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting thermolog");

    let store = Arc::new(SqliteStore::open(&config.storage.path)?);

    Supervisor::new(config, store).run(shutdown_signal()).await
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
