//! wardend daemon entry point.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wardend::config::Config;
use wardend::dispatch::Dispatcher;
use wardend::gateway::{NoopMirror, NoopProvisioner};
use wardend::state::{Warden, WardenParams};
use wardend::store::{self, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wardend.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            warn!(path = %config_path, error = %e, "Failed to load config");
            e
        })?
    } else {
        info!(path = %config_path, "No config file, using defaults");
        Config::default()
    };

    if config.server.credential.is_none() {
        warn!("No gateway credential configured; running headless");
    }

    // Initialize the store and load the durable tables
    let store = Store::new(config.server.data_dir.clone());
    store.init().await?;
    let tables = store.load().await;
    store::log_loaded(&tables);

    let flush_interval = config.server.flush_interval_secs.max(1);

    // Build the application state. The platform gateway would hand in its
    // own provisioner and mirror here; headless runs use the no-ops.
    let warden = Arc::new(Warden::new(WardenParams {
        config,
        store,
        tables,
        provisioner: Arc::new(NoopProvisioner),
        mirror: Arc::new(NoopMirror),
    }));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&warden)));

    // Periodic durable flush
    {
        let warden = Arc::clone(&warden);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(flush_interval));
            interval.tick().await; // first tick is immediate; skip it
            loop {
                interval.tick().await;
                warden.flush_all().await;
                info!("Periodic flush completed");
            }
        });
    }

    // Dedup-cache and cooldown upkeep (runs every minute)
    {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                dispatcher.sweep();
            }
        });
    }

    info!("wardend ready");

    // Serve until interrupted, then flush once more on the way out. A
    // failed final flush is logged inside flush_all; exit stays clean.
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    warden.flush_all().await;
    info!("Durable state flushed; bye");

    Ok(())
}
