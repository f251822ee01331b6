//! # gridstore-core
//!
//! Core of a hierarchically-namespaced, replicated key-value data grid.
//!
//! This crate provides:
//! - The asset tree: a path-addressed namespace that lazily materializes
//!   typed views (maps, entry sets, topic publishers, subscriptions) over
//!   raw key-value stores, with per-subtree factory policy
//! - Subscription collections: per-resource observer sets with ordered
//!   insert/update/remove/key notification and bootstrap replay
//! - The key-value store contract consumed by views and replay, plus
//!   in-memory implementations (plain and replicated)
//! - The engine replication contract: per-remote modification iterators
//!   and last-writer-wins application of remote events

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod defaults;
pub mod query;
pub mod replication;
pub mod store;
pub mod subscription;
pub mod tree;
pub mod view;

pub use clock::MonotonicClock;
pub use query::RequestContext;
pub use replication::{
    EngineReplication, ModificationIterator, ReplicatedStore, ReplicationEntry, ReplicationError,
};
pub use store::{KeyValueStore, MemoryStore};
pub use subscription::{
    EntryCallback, KeyCallback, MapEvent, SubscriberId, SubscriptionCollection, TopicCallback,
};
pub use tree::{Asset, FactoryContext, FactoryFactory, Item, NodeKind, TreeError, ViewFactory};
pub use view::{EntrySetView, MapView, TopicPublisher, View, ViewKind};
