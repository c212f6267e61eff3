//! Home Assistant Rust Server
//!
//! Loads `configuration.yaml`, sets up the RFLink integration and runs until
//! interrupted. On Ctrl-C the host stop event is fired, the integration is
//! shut down and the last known entity states are written for the next
//! start.

use anyhow::{Context as _, Result};
use clap::Parser;
use ha_config::HostConfig;
use ha_core::events::HOMEASSISTANT_STOP;
use ha_core::Context;
use ha_restore_state::RestoreStateStore;
use ha_rflink::{Host, Rflink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "homeassistant", version, about = "Home Assistant (Rust) with RFLink")]
struct Args {
    /// Directory holding configuration.yaml and .storage/
    #[arg(short, long, default_value = "./config")]
    config: PathBuf,

    /// Debug logging for the RFLink integration
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default = if verbose {
        "info,ha_rflink=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot install tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    info!(config = %args.config.display(), "Starting Home Assistant (Rust)");

    let config = HostConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let restore = match RestoreStateStore::load(&args.config).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Cannot read restore state, starting without it");
            RestoreStateStore::empty(&args.config)
        }
    };
    let restore = Arc::new(restore);
    let host = Host::new().with_restore(restore.clone());

    let rflink = Rflink::setup(&host, &config).context("setting up rflink")?;
    if rflink.is_none() {
        warn!("No rflink section in configuration, nothing to do");
    }

    info!("Home Assistant is running");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    host.bus
        .fire_json(HOMEASSISTANT_STOP, serde_json::json!({}), Context::new());
    if let Some(rflink) = rflink {
        rflink.shutdown().await;
    }

    let stored = restore
        .dump(&host.states)
        .await
        .context("writing restore state")?;
    info!(stored, "Restore state saved");

    Ok(())
}
