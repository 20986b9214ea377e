//! Gavel Watcher binary.
//!
//! Entry point for the watcher that logs live auction activity.

use anyhow::Context;
use gavel_watcher::{WatcherConfig, WatcherService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gavel_watcher=debug,gavel_sdk=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = WatcherConfig::from_env().context("loading configuration")?;

    tracing::info!("Starting Gavel Watcher");
    tracing::info!("Socket URL: {}", config.ws_url);
    tracing::info!("API URL: {}", config.api_url);
    tracing::info!("Auctions: {:?}", config.auctions);

    let mut service = WatcherService::new(config).context("creating watcher")?;
    service.run().await.context("running watcher")?;

    tracing::info!("Gavel Watcher stopped");
    Ok(())
}
