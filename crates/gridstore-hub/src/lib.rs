//! # GridStore Hub
//!
//! Point-to-point replication over a framed, transaction-tagged stream.
//!
//! A [`Connection`] multiplexes independent exchanges over one duplex
//! stream. A [`ReplicationHub`] drives the initiator side of the protocol
//! (identifier discovery, bootstrap handshake, event streaming) and
//! [`serve_peer`] answers the responder side.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod hub;

pub use connection::{Connection, ConnectionError};
pub use hub::{serve_peer, HubConfig, HubError, PeerSession, ReplicationHub};
