//! cacheop-agent: reconcile driver for managed cache resources.
//!
//! This daemon:
//! - Loads a JSON manifest of desired cache specifications
//! - Reconciles each cache against the remote control plane on an interval
//! - Persists last-requested metadata in a local SQLite database
//! - Deletes caches that disappear from the manifest

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cacheop_core::{LastRequestedStore, Reconciler, ReconcilerConfig};

mod client;
mod driver;
mod store;

/// cacheop reconcile agent
#[derive(Parser, Debug)]
#[command(name = "cacheop-agent", version, about)]
struct Args {
    /// Control-plane endpoint (e.g., http://127.0.0.1:8080)
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    control_plane_endpoint: String,

    /// Path to the desired-state manifest (JSON)
    #[arg(long, default_value = "/etc/cacheop/manifest.json")]
    manifest: String,

    /// Directory for the metadata database
    #[arg(long, default_value = "/var/lib/cacheop")]
    metadata_dir: String,

    /// Reconcile interval in seconds
    #[arg(long, default_value = "60")]
    reconcile_interval: u64,

    /// Maximum concurrent per-cache workers
    #[arg(long, default_value = "4")]
    max_workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cacheop_agent=info,cacheop_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting cacheop-agent");
    info!("Control plane: {}", args.control_plane_endpoint);
    info!("Manifest: {}", args.manifest);

    let store = store::SqliteStore::new(&args.metadata_dir)
        .await
        .context("opening metadata store")?;
    let remote = Arc::new(client::HttpRemote::new(&args.control_plane_endpoint));
    let reconciler = Arc::new(Reconciler::new(
        remote,
        LastRequestedStore::new(Arc::new(store)),
        ReconcilerConfig::default(),
    ));
    let mut driver = driver::Driver::new(reconciler, args.max_workers);

    let mut ticker = tokio::time::interval(Duration::from_secs(args.reconcile_interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let manifest = match driver::Manifest::load(&args.manifest).await {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        error!("Failed to load manifest: {:#}", e);
                        continue;
                    }
                };
                if let Err(e) = driver.run_pass(&manifest).await {
                    error!("Reconcile pass failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
