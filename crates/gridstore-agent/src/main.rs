//! # GridStore Agent
//!
//! Runtime for a replicated, hierarchically-namespaced data grid node.
//!
//! The agent builds an asset tree, creates the configured replicated
//! stores under it, then opens one replication session per peer and
//! store. Inbound replication connections can be served as well.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting GridStore agent"
    );

    let config = AgentConfig::from_env()?;
    tracing::info!(
        identifier = config.identifier,
        stores = config.stores.len(),
        peers = config.peers.len(),
        "Agent configured"
    );

    let agent = Agent::new(config)?;
    agent.run().await?;

    Ok(())
}
