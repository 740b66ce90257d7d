//! Banker launcher.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use streetmarket::banker::{self, BankerConfig};
use streetmarket::bus::{BusClient, BusConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bus_cfg = BusConfig::from_env();
    let cfg = BankerConfig::from_env();
    let bus = BusClient::connect(&bus_cfg).await.context("connecting to bus")?;

    tokio::select! {
        result = banker::run(bus, cfg) => result.context("banker exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}
