//! LeafMesh Daemon
//!
//! Keeps the health of commissioned leaves current by refreshing them on a
//! fixed period and logging status transitions.

use clap::Parser;
use leafmesh_daemon::health::{self, status_changes};
use leafmesh_daemon::{Controller, ControllerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "leafmeshd")]
#[command(about = "LeafMesh daemon - periodic leaf health refresh")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Refresh period in seconds, overrides the configuration
    #[arg(short, long)]
    interval: Option<u64>,

    /// Refresh once and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("LeafMesh daemon v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(leafmesh_common::default_config_path);
    let mut config = ControllerConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(interval) = cli.interval {
        config.health.interval_secs = interval;
    }
    config.validate()?;

    tokio::fs::create_dir_all(&config.store_path).await?;
    let controller = Controller::open(&config)?;

    let period = match config.health_interval() {
        Some(period) if !cli.once => period,
        _ => {
            if !cli.once {
                warn!("Health ticker disabled (health.interval_secs = 0); refreshing once");
            }
            let records = controller.refresh().await?;
            for change in status_changes(&[], &records) {
                info!("{}: {}", change.address, change.to);
            }
            return Ok(());
        }
    };

    run_ticker(controller, period).await
}

async fn run_ticker(controller: Controller, period: Duration) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (handle, mut snapshots) = controller.health().clone().spawn_ticker(period, cancel.clone());

    let watcher = tokio::spawn(async move {
        let mut previous = Vec::new();
        while snapshots.changed().await.is_ok() {
            let current = snapshots.borrow_and_update().clone();
            for change in status_changes(&previous, &current) {
                info!("{}: {} -> {}", change.address, change.from, change.to);
            }
            if health::sync_ready(&current) != health::sync_ready(&previous) {
                info!("Mesh sync ready: {}", health::sync_ready(&current));
            }
            previous = current;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    cancel.cancel();

    if let Err(e) = handle.await {
        tracing::error!("Health ticker error: {}", e);
    }
    let _ = watcher.await;

    info!("Daemon shutdown complete");
    Ok(())
}
