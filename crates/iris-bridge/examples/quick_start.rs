//! Quick Start
//!
//! Wires a configuration record into a running bridge. Expects a local tool
//! server (see the `tool_server` example) and a `config.yaml` or the
//! `ACCESS_ID` / `ACCESS_SECRET` / `ENDPOINT` / `TOOL_SERVER_ENDPOINT`
//! environment variables.
//!
//! Run with: cargo run --example quick_start

use anyhow::Result;
use iris_bridge::{BridgeBuilder, BridgeConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("iris_bridge=debug,quick_start=info")
        .init();

    let config = BridgeConfig::load()?;
    let bridge = BridgeBuilder::new().config(config).build()?;

    bridge.run().await?;
    info!("bridge is up");

    let stopped = bridge.stopped();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            bridge.shutdown().await;
        }
        _ = stopped.cancelled() => {
            info!("bridge terminated by the gateway");
        }
    }
    Ok(())
}
