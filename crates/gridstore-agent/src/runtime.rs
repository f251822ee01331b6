//! Agent runtime orchestration.

use crate::config::{parse_peer_url, AgentConfig};
use anyhow::{Context, Result};
use gridstore_core::{defaults, Asset, EngineReplication, NodeKind, ViewKind};
use gridstore_hub::{serve_peer, Connection, HubConfig, PeerSession, ReplicationHub};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// The main agent runtime.
///
/// Owns the asset tree, creates the configured replicated stores under
/// it, and wires a replication session per peer and store.
pub struct Agent {
    config: AgentConfig,
    root: Arc<Asset>,
    stores: Vec<(String, Arc<dyn EngineReplication>)>,
}

impl Agent {
    /// Build the tree and the configured stores.
    ///
    /// # Errors
    ///
    /// Returns error if a store path cannot be resolved or a configured
    /// store does not support replication.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let root = Asset::root();
        defaults::install(&root);

        let mut stores = Vec::with_capacity(config.stores.len());
        for path in &config.stores {
            let request = format!(
                "{path}?replicated=true&identifier={}&segments={}",
                config.identifier, config.segments
            );
            let asset = root
                .acquire_child(&request, NodeKind::Map)
                .with_context(|| format!("Failed to create store {path}"))?;
            let store = asset
                .acquire_view(ViewKind::KeyValueStore, "")
                .with_context(|| format!("Failed to open store {path}"))?
                .as_store()
                .with_context(|| format!("Store {path} has no key-value view"))?;
            let engine = store
                .engine_replication()
                .with_context(|| format!("Store {path} does not support replication"))?;
            tracing::info!(store = %path, "Replicated store ready");
            stores.push((path.clone(), engine));
        }

        Ok(Self {
            config,
            root,
            stores,
        })
    }

    /// Run until interrupted.
    ///
    /// Connects one replication session per peer and store, optionally
    /// serves inbound peers, and shuts everything down on ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns error if a listener cannot bind, a peer is unreachable,
    /// or a handshake fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!(assets = self.root.children().len(), "Asset tree ready");

        let mut sessions: Vec<PeerSession> = Vec::new();
        let mut tasks = Vec::new();

        if let Some(listen) = &self.config.listen {
            tasks.push(self.spawn_listener(listen).await?);
        }

        for peer in &self.config.peers {
            let (host, port) = parse_peer_url(peer)?;
            for (path, engine) in &self.stores {
                let stream = TcpStream::connect((host.as_str(), port))
                    .await
                    .with_context(|| format!("Failed to connect to peer {peer}"))?;
                let connection = Arc::new(Connection::new(stream));
                let hub = ReplicationHub::new(
                    connection,
                    HubConfig {
                        local_identifier: self.config.identifier,
                        reply_timeout: self.config.reply_timeout,
                    },
                );
                let session = hub
                    .bootstrap(engine.clone())
                    .await
                    .with_context(|| format!("Handshake with peer {peer} failed"))?;
                tracing::info!(
                    peer = %peer,
                    store = %path,
                    remote_identifier = session.remote_identifier,
                    "Replication session established"
                );
                sessions.push(session);
            }
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to wait for shutdown signal")?;
        tracing::info!("Shutting down");

        for session in sessions {
            session.task.abort();
        }
        for task in tasks {
            task.abort();
        }
        Ok(())
    }

    // TODO: route accepted connections to their store once frames carry a
    // channel identifier; until then inbound peers replicate the first
    // configured store only.
    async fn spawn_listener(&self, listen: &str) -> Result<tokio::task::JoinHandle<()>> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("Failed to bind {listen}"))?;
        tracing::info!(addr = %listen, "Listening for replication peers");

        let engine = self
            .stores
            .first()
            .map(|(_, engine)| engine.clone())
            .context("Cannot listen without a configured store")?;
        let identifier = self.config.identifier;

        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::info!(%addr, "Peer connected");
                        let connection = Arc::new(Connection::new(stream));
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_peer(connection, engine, identifier).await {
                                tracing::error!(error = %err, %addr, "Peer session failed");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                    }
                }
            }
        }))
    }
}
