//! LeafMesh CLI - Main Entry Point
//!
//! Operator interface for commissioning leaf routers, checking their health,
//! synchronizing mesh settings, and managing controller tokens.

use clap::{Parser, Subcommand};
use leafmesh_daemon::{Controller, ControllerConfig};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{leaf, sync, token};

/// LeafMesh CLI - mesh leaf commissioning and health
#[derive(Parser)]
#[command(name = "leafmesh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store directory
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// OTP code for step-up before credential operations
    #[arg(long, global = true, env = "LEAFMESH_OTP")]
    otp: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Leaf(leaf::LeafCommands),

    /// Synchronize settings across the mesh
    #[command(subcommand)]
    Sync(sync::SyncCommands),

    /// Manage controller API tokens
    #[command(subcommand)]
    Token(token::TokenCommands),

    /// Write the effective configuration to the config file
    InitConfig,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(leafmesh_common::default_config_path);
    let mut config = ControllerConfig::load(&config_path)?;
    if let Some(store) = cli.store.clone() {
        config.store_path = store;
    }
    tracing::debug!(
        "Config {} (store {})",
        config_path.display(),
        config.store_path.display()
    );

    match cli.command {
        Commands::Version => {
            println!("LeafMesh CLI v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::InitConfig => {
            config.save(&config_path)?;
            output::print_success(&format!("Configuration written to {}", config_path.display()));
            return Ok(());
        }
        _ => {}
    }

    config.validate()?;
    let controller = Controller::open(&config)?;

    if let Some(code) = cli.otp.as_deref() {
        if let Err(e) = controller.step_up(code).await {
            output::print_error("OTP step-up failed");
            return Err(e.into());
        }
    }

    let result = match cli.command {
        Commands::Leaf(cmd) => leaf::execute(cmd, controller, cli.format).await,
        Commands::Sync(cmd) => sync::execute(cmd, controller).await,
        Commands::Token(cmd) => token::execute(cmd, controller, cli.format).await,
        Commands::InitConfig | Commands::Version => Ok(()),
    };

    if let Err(e) = &result {
        if let Some(hint) = auth_hint(e) {
            output::print_error(hint);
        }
    }
    result
}

/// Remedy for authorization failures that escape a command
fn auth_hint(err: &anyhow::Error) -> Option<&'static str> {
    let err = err.downcast_ref::<leafmesh_common::Error>()?;
    if err.needs_otp() {
        Some("This operation needs step-up; pass --otp <code>")
    } else if matches!(
        err,
        leafmesh_common::Error::RemoteAuthRequired { side: leafmesh_common::AuthSide::Controller, .. }
    ) {
        Some("The controller API rejected its token; check controller.api_token")
    } else {
        None
    }
}
