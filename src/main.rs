//! Tracegrid server
//!
//! Runs one database node, the grid master and the HTTP API in one process.
//!
//! Run with: cargo run --bin tracegrid -- --config config.toml
//!
//! Configuration is read from the given file, or else from the default
//! locations, then `TRACEGRID_*` environment variables are applied.
//! `RUST_LOG` takes precedence over the configured log level.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracegrid::api::{serve, shutdown_signal, AppState};
use tracegrid::config::{Config, LoggingConfig};
use tracegrid::db::{DatabaseNode, DatabaseSettings};
use tracegrid::grid::{GridMaster, LocalNodeConnector, MasterSettings};
use tracegrid::storage::StorageError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tracegrid")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Execution trace store with a grid master and HTTP API")]
struct Args {
    /// Path to a config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_logging(&config.logging);

    tracing::info!("Starting Tracegrid v{}", env!("CARGO_PKG_VERSION"));

    let settings = DatabaseSettings::from_config(&config)?;
    let node = DatabaseNode::new(config.node.hostname.clone(), settings)?;
    let snapshot_dir = PathBuf::from(&config.storage.data_dir);
    if config.node.persist_snapshot {
        restore_snapshot(&node, &snapshot_dir)?;
    }

    let master = GridMaster::new(MasterSettings::from_config(&config));
    master.register_node(Arc::new(LocalNodeConnector::new(Arc::clone(&node))))?;

    // Remaining nodes may register later; readiness reports until then
    let expected_nodes = config.master.expected_nodes;
    let waiting = Arc::clone(&master);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = waiting.wait_ready(expected_nodes) {
            tracing::error!(error = %e, "Master failed to start");
        }
    });

    let state = AppState::new(Arc::clone(&master), Arc::clone(&node), config.api.clone());
    serve(state, shutdown_signal()).await?;

    tracing::info!("Shutting down...");
    master.shutdown()?;
    if config.node.persist_snapshot {
        std::fs::create_dir_all(&snapshot_dir)?;
        node.save_snapshot(&snapshot_dir)?;
        tracing::info!("Snapshot saved to {:?}", snapshot_dir);
    }
    node.shutdown()?;

    tracing::info!("Tracegrid shutdown complete");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tracegrid={},tower_http=info", logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn restore_snapshot(node: &DatabaseNode, dir: &Path) -> Result<(), StorageError> {
    match node.restore_snapshot(dir) {
        Ok(()) => {
            let stats = node.stats();
            tracing::info!(events = stats.events_count, "Restored snapshot from {:?}", dir);
            Ok(())
        }
        Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No snapshot in {:?}, starting empty", dir);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
