//! Protocol messages for hub replication.

use gridstore_core::ReplicationEntry;
use serde::{Deserialize, Serialize};

/// Catch-up handshake: each side declares the newest timestamp it has
/// already seen from the other and the identifier it replicates under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    /// Newest remote timestamp already applied locally, in epoch millis.
    pub last_updated_time: u64,
    /// Stable replica identifier of the sender.
    pub identifier: u8,
}

impl Bootstrap {
    /// Create a bootstrap message.
    #[must_use]
    pub fn new(last_updated_time: u64, identifier: u8) -> Self {
        Self {
            last_updated_time,
            identifier,
        }
    }
}

/// The payload of a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FrameBody {
    /// Ask the peer for its replica identifier.
    IdentifierRequest,
    /// The peer's replica identifier.
    IdentifierReply(u8),
    /// Catch-up handshake, sent in both directions.
    Bootstrap(Bootstrap),
    /// One replicated mutation.
    ReplicationEvent(ReplicationEntry),
}

/// A transaction-tagged envelope.
///
/// Replies carry the `tid` of the request (or, for streamed replication
/// events, the `tid` of the bootstrap that opened the stream) so a single
/// connection can multiplex independent exchanges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Transaction identifier correlating this frame to an exchange.
    pub tid: u64,
    /// The message itself.
    pub body: FrameBody,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(tid: u64, body: FrameBody) -> Self {
        Self { tid, body }
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialize(String),
}
