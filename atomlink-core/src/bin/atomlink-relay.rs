//! Atomlink relay binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing, `RUST_LOG` aware)
//! 2. Load configuration from `atomlink.yaml` (or the path given as the
//!    first argument), then apply `ATOMLINK_*` environment overrides
//! 3. Bind the relay and serve until Ctrl-C

use std::path::PathBuf;

use anyhow::Context;
use atomlink_core::server::{RelayConfig, RelayServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(atomlink_core::server::DEFAULT_CONFIG_FILE));
    let config = RelayConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        address = %config.address(),
        stats_interval_secs = config.stats_interval_secs,
        "configuration loaded"
    );

    let server = RelayServer::bind(config).await.context("starting relay")?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received");
                shutdown.shutdown();
            }
            Err(error) => warn!(%error, "failed to listen for ctrl-c"),
        }
    });

    server.run().await.context("relay stopped with an error")?;
    info!("relay exited");
    Ok(())
}
