//! Governor launcher.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use streetmarket::bus::{BusClient, BusConfig};
use streetmarket::governor::{self, GovernorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bus_cfg = BusConfig::from_env();
    let cfg = GovernorConfig::from_env();
    let bus = BusClient::connect(&bus_cfg).await.context("connecting to bus")?;

    tokio::select! {
        result = governor::run(bus, cfg) => result.context("governor exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}
