//! Chef agent launcher.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use streetmarket::agent::{self, DEFAULT_STARTING_WALLET};
use streetmarket::bus::{BusClient, BusConfig};
use streetmarket::strategies::chef::Chef;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let agent_id = std::env::var("AGENT_ID").unwrap_or_else(|_| "chef-1".to_string());
    let bus_cfg = BusConfig::from_env();
    let bus = BusClient::connect(&bus_cfg).await.context("connecting to bus")?;
    let strategy = Box::new(Chef::new(agent_id));

    tokio::select! {
        result = agent::run(bus, DEFAULT_STARTING_WALLET, strategy) => result.context("chef agent exited"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}
