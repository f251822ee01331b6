//! The replication hub: bootstrap handshake and event streaming.
//!
//! The initiator learns the peer's replica identifier, exchanges
//! [`Bootstrap`] messages so each side can resume from the newest remote
//! timestamp it already holds, then streams modifications both ways under
//! the bootstrap transaction. The responder side is [`serve_peer`].

use crate::connection::{Connection, ConnectionError};
use gridstore_core::{EngineReplication, ModificationIterator, ReplicationEntry};
use gridstore_proto::{Bootstrap, Frame, FrameBody};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// How often each side sweeps its modification iterator for new entries.
const STREAM_POLL: Duration = Duration::from_millis(50);

/// Errors raised by the replication hub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The underlying connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The peer answered with a frame the protocol does not allow here.
    #[error("unexpected frame in reply to tid {tid}: {detail}")]
    UnexpectedFrame {
        /// The transaction the frame arrived under.
        tid: u64,
        /// What arrived instead of the expected body.
        detail: String,
    },
    /// A replicated mutation could not be applied to the local store.
    #[error("failed to apply replicated entry: {0}")]
    Apply(String),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Replica identifier this hub replicates under.
    pub local_identifier: u8,
    /// How long to wait for a handshake reply. `None` waits forever.
    pub reply_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            local_identifier: 1,
            reply_timeout: None,
        }
    }
}

/// A bootstrapped replication session with one peer.
#[derive(Debug)]
pub struct PeerSession {
    /// The peer's replica identifier, learned during the handshake.
    pub remote_identifier: u8,
    /// The streaming task. Finishes when the connection is lost.
    pub task: tokio::task::JoinHandle<()>,
}

/// Initiator side of the replication protocol.
pub struct ReplicationHub<S> {
    connection: Arc<Connection<S>>,
    config: HubConfig,
}

impl<S> ReplicationHub<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a hub over an established connection.
    pub fn new(connection: Arc<Connection<S>>, config: HubConfig) -> Self {
        Self { connection, config }
    }

    /// Run the handshake and start streaming.
    ///
    /// Learns the peer's identifier, exchanges bootstrap high-water marks,
    /// primes the modification iterator so only entries the peer has not
    /// yet seen are sent, then hands the stream to a background task.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails, a handshake reply is
    /// missing or malformed, or the reply wait elapses.
    pub async fn bootstrap(
        &self,
        replication: Arc<dyn EngineReplication>,
    ) -> Result<PeerSession, HubError> {
        let wait = self.config.reply_timeout;

        let tid = self.connection.next_tid();
        self.connection
            .send(&Frame::new(tid, FrameBody::IdentifierRequest))
            .await?;
        let reply = self.connection.recv_reply(tid, wait).await?;
        let remote_identifier = match reply.body {
            FrameBody::IdentifierReply(identifier) => identifier,
            other => {
                return Err(HubError::UnexpectedFrame {
                    tid,
                    detail: format!("{other:?}"),
                })
            }
        };
        tracing::debug!(remote_identifier, "Peer identified");

        let iterator = replication.acquire_modification_iterator(remote_identifier);
        let last_updated = replication.last_modification_time(remote_identifier);

        let boot_tid = self.connection.next_tid();
        self.connection
            .send(&Frame::new(
                boot_tid,
                FrameBody::Bootstrap(Bootstrap::new(last_updated, self.config.local_identifier)),
            ))
            .await?;
        let reply = self.connection.recv_reply(boot_tid, wait).await?;
        let peer = match reply.body {
            FrameBody::Bootstrap(peer) => peer,
            other => {
                return Err(HubError::UnexpectedFrame {
                    tid: boot_tid,
                    detail: format!("{other:?}"),
                })
            }
        };
        tracing::info!(
            remote_identifier,
            peer_last_updated = peer.last_updated_time,
            "Bootstrap exchanged"
        );

        // Skip everything the peer declared it already holds.
        iterator.dirty_entries(peer.last_updated_time);

        let connection = self.connection.clone();
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                result = pump(&connection, &*iterator, boot_tid) => result,
                result = apply_inbound(&connection, &*replication, boot_tid) => result,
            };
            if let Err(err) = result {
                tracing::error!(error = %err, remote_identifier, "Replication stream ended");
            }
        });

        Ok(PeerSession {
            remote_identifier,
            task,
        })
    }
}

/// Sweep the iterator on an interval and batch out anything dirty.
async fn pump<S>(
    connection: &Connection<S>,
    iterator: &dyn ModificationIterator,
    tid: u64,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite,
{
    let mut poll = tokio::time::interval(STREAM_POLL);
    loop {
        poll.tick().await;
        drain(connection, iterator, tid).await?;
    }
}

/// Apply inbound replication events until the connection fails.
async fn apply_inbound<S>(
    connection: &Connection<S>,
    replication: &dyn EngineReplication,
    tid: u64,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let frame = connection.recv_reply(tid, None).await?;
        match frame.body {
            FrameBody::ReplicationEvent(entry) => apply(replication, entry)?,
            other => {
                return Err(HubError::UnexpectedFrame {
                    tid,
                    detail: format!("{other:?}"),
                })
            }
        }
    }
}

/// Send every pending modification for the peer as one batch.
async fn drain<S>(
    connection: &Connection<S>,
    iterator: &dyn ModificationIterator,
    tid: u64,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite,
{
    let mut outbound = Vec::new();
    iterator.for_each(&mut |entry| {
        outbound.push(Frame::new(tid, FrameBody::ReplicationEvent(entry.clone())));
    });
    if !outbound.is_empty() {
        tracing::debug!(events = outbound.len(), "Streaming modifications");
        connection.send_batch(&outbound).await?;
    }
    Ok(())
}

fn apply(replication: &dyn EngineReplication, entry: ReplicationEntry) -> Result<(), HubError> {
    tracing::trace!(key = %entry.key, timestamp = entry.timestamp, "Applying replicated entry");
    replication
        .apply_replication(entry)
        .map_err(|e| HubError::Apply(e.to_string()))
}

/// Responder side of the replication protocol.
///
/// Answers identifier requests, mirrors the bootstrap exchange, then
/// streams modifications back under the initiator's bootstrap
/// transaction while applying inbound events. Returns `Ok` when the peer
/// closes the connection cleanly.
///
/// # Errors
///
/// Returns error if the connection fails mid-frame or a mutation cannot
/// be applied.
pub async fn serve_peer<S>(
    connection: Arc<Connection<S>>,
    replication: Arc<dyn EngineReplication>,
    local_identifier: u8,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut pump_task: Option<tokio::task::JoinHandle<()>> = None;
    let result = serve_loop(&connection, &replication, local_identifier, &mut pump_task).await;
    if let Some(task) = pump_task {
        task.abort();
    }
    result
}

async fn serve_loop<S>(
    connection: &Arc<Connection<S>>,
    replication: &Arc<dyn EngineReplication>,
    local_identifier: u8,
    pump_task: &mut Option<tokio::task::JoinHandle<()>>,
) -> Result<(), HubError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let frame = match connection.recv_any().await {
            Ok(frame) => frame,
            Err(ConnectionError::Closed) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        match frame.body {
            FrameBody::IdentifierRequest => {
                connection
                    .send(&Frame::new(
                        frame.tid,
                        FrameBody::IdentifierReply(local_identifier),
                    ))
                    .await?;
            }
            FrameBody::Bootstrap(peer) => {
                let iterator = replication.acquire_modification_iterator(peer.identifier);
                let last_updated = replication.last_modification_time(peer.identifier);
                connection
                    .send(&Frame::new(
                        frame.tid,
                        FrameBody::Bootstrap(Bootstrap::new(last_updated, local_identifier)),
                    ))
                    .await?;
                iterator.dirty_entries(peer.last_updated_time);
                tracing::info!(
                    peer_identifier = peer.identifier,
                    peer_last_updated = peer.last_updated_time,
                    "Bootstrap answered"
                );
                if let Some(task) = pump_task.take() {
                    task.abort();
                }
                let pump_connection = connection.clone();
                let tid = frame.tid;
                *pump_task = Some(tokio::spawn(async move {
                    if let Err(err) = pump(&pump_connection, &*iterator, tid).await {
                        tracing::error!(error = %err, "Outbound replication pump ended");
                    }
                }));
            }
            FrameBody::ReplicationEvent(entry) => {
                apply(&**replication, entry)?;
            }
            FrameBody::IdentifierReply(_) => {
                tracing::warn!(tid = frame.tid, "Ignoring stray identifier reply");
            }
        }
    }
}
