//! sfwater - track San Francisco water usage from the SFPUC portal

use clap::Parser;
use sfwater::{
    cli::Cli,
    coordinator::SfWaterCoordinator,
    error::Result,
    statistics::MemorySink,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over the verbosity flag default.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("sfwater=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sfwater=info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.resolve_config()?;
    let interval = std::time::Duration::from_secs(config.update_interval_hours * 3600);

    // The runner keeps statistics in memory; platform hosts supply their
    // own persistent sink through the library API.
    let sink = Arc::new(MemorySink::new());
    let coordinator = Arc::new(SfWaterCoordinator::new(config, sink)?);

    info!("Starting sfwater (refresh every {:?})", interval);
    loop {
        match coordinator.refresh().await {
            Ok(usage) => {
                info!(
                    "Current billing period usage: {:.2} gallons (as of {})",
                    usage.current_bill_usage, usage.last_updated
                );
                println!(
                    "{}",
                    serde_json::json!({
                        "current_bill_usage": usage.current_bill_usage,
                        "last_updated": usage.last_updated.to_rfc3339(),
                    })
                );
            }
            Err(err) => error!("Refresh failed: {}", err),
        }

        if cli.once {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    Ok(())
}
