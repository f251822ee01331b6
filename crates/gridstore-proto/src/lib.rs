//! # GridStore Protocol
//!
//! Wire message definitions for hub-to-hub replication.
//!
//! ## Messages
//!
//! - `Frame`: Transaction-tagged envelope for every exchange
//! - `Bootstrap`: Catch-up handshake carrying identifier and high-water mark
//! - `FrameBody::ReplicationEvent`: A single replicated mutation
//!
//! Every frame is CBOR under a little-endian `u32` length prefix.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;

pub use messages::{Bootstrap, Frame, FrameBody, MessageError};
