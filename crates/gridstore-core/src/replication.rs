//! Engine replication: per-remote modification logs and last-writer-wins
//! application of remote events.
//!
//! A replicated store keeps a commit-order log of its modifications. Each
//! remote peer gets a [`ModificationIterator`], a cursor into that log that
//! skips entries which originated at that peer. `dirty_entries` re-primes
//! the cursor from a timestamp; draining the iterator clears the pending
//! entries as they are handed to the visitor. Each write compacts away the
//! superseded log entry for the same key, so the log is bounded by the
//! keyspace rather than by write volume.

use crate::clock::MonotonicClock;
use crate::store::{segment_for, KeyValueStore};
use crate::subscription::SubscriptionCollection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// One replicated modification: a write (`value` present) or a deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEntry {
    /// The affected key.
    pub key: String,
    /// The written value; `None` for a deletion.
    pub value: Option<Value>,
    /// Modification timestamp.
    pub timestamp: u64,
    /// Identifier of the node where the modification originated.
    pub identifier: u8,
}

/// Errors applying remote modifications.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplicationError {
    /// The event could not be applied to the local store.
    #[error("failed to apply replication event: {0}")]
    Apply(String),
}

/// The replication contract a store exposes to a replication hub.
pub trait EngineReplication: Send + Sync {
    /// The iterator over modifications the given remote has not seen.
    fn acquire_modification_iterator(&self, remote_identifier: u8) -> Arc<dyn ModificationIterator>;

    /// Timestamp of the latest modification known to have originated at the
    /// given remote; zero when none has been seen.
    fn last_modification_time(&self, remote_identifier: u8) -> u64;

    /// Apply one remote modification, last-writer-wins.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Apply`] when the event cannot be applied.
    fn apply_replication(&self, entry: ReplicationEntry) -> Result<(), ReplicationError>;
}

/// A cursor over a store's pending-change log, scoped to one remote.
pub trait ModificationIterator: Send + Sync {
    /// Re-prime the cursor to resume after `since`.
    fn dirty_entries(&self, since: u64);

    /// Drain pending entries to the visitor in commit order, clearing them.
    fn for_each(&self, visitor: &mut dyn FnMut(&ReplicationEntry));
}

#[derive(Debug, Clone)]
struct Versioned {
    value: Option<Value>,
    timestamp: u64,
    identifier: u8,
}

impl Versioned {
    fn supersedes(&self, other: &Versioned) -> bool {
        (self.timestamp, self.identifier) > (other.timestamp, other.identifier)
    }
}

type Log = Arc<Mutex<Vec<ReplicationEntry>>>;

/// A segmented in-memory store with a replication log.
///
/// Implements both [`KeyValueStore`] (local reads and writes) and
/// [`EngineReplication`] (per-remote iterators, timestamps, application of
/// remote events). Removals are kept as tombstones so a stale remote write
/// cannot resurrect a deleted key.
pub struct ReplicatedStore {
    local_identifier: u8,
    segments: Vec<RwLock<HashMap<String, Versioned>>>,
    log: Log,
    clock: MonotonicClock,
    iterators: Mutex<HashMap<u8, Arc<LogModificationIterator>>>,
    last_modification: Mutex<HashMap<u8, u64>>,
    subscription: RwLock<Option<Weak<SubscriptionCollection>>>,
}

impl ReplicatedStore {
    /// Create a store for the node identified by `local_identifier`.
    #[must_use]
    pub fn new(local_identifier: u8, segments: usize) -> Arc<Self> {
        let segments = segments.max(1);
        Arc::new(Self {
            local_identifier,
            segments: (0..segments).map(|_| RwLock::new(HashMap::new())).collect(),
            log: Arc::new(Mutex::new(Vec::new())),
            clock: MonotonicClock::new(),
            iterators: Mutex::new(HashMap::new()),
            last_modification: Mutex::new(HashMap::new()),
            subscription: RwLock::new(None),
        })
    }

    /// This node's replication identifier.
    #[must_use]
    pub fn local_identifier(&self) -> u8 {
        self.local_identifier
    }

    /// Append to the log, compacting away the superseded entry for the same
    /// key. The log therefore holds at most one entry per key (tombstones
    /// included) and is bounded by the keyspace, while a catch-up peer still
    /// receives every key's newest state.
    fn record(&self, entry: ReplicationEntry) {
        let iterators = self
            .iterators
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut log = self
            .log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(superseded) = log.iter().position(|e| e.key == entry.key) {
            log.remove(superseded);
            // Entries behind a cursor shift down with the removal.
            for iterator in iterators.values() {
                let mut cursor = iterator
                    .cursor
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if *cursor > superseded {
                    *cursor -= 1;
                }
            }
        }
        log.push(entry);
    }

    fn segment(&self, key: &str) -> &RwLock<HashMap<String, Versioned>> {
        &self.segments[segment_for(key, self.segments.len())]
    }

    fn live_subscription(&self) -> Option<Arc<SubscriptionCollection>> {
        self.subscription
            .read()
            .ok()?
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn notify(&self, key: &str, old: Option<Value>, value: Option<Value>) {
        if let Some(sub) = self.live_subscription() {
            match value {
                Some(value) => sub.notify_update(key, old, value),
                None => sub.notify_removal(key, old),
            }
        }
    }
}

impl KeyValueStore for ReplicatedStore {
    fn segments(&self) -> usize {
        self.segments.len()
    }

    fn entries_for(&self, segment: usize, visitor: &mut dyn FnMut(&str, &Value)) {
        if let Some(seg) = self.segments.get(segment) {
            let guard = seg.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (key, versioned) in guard.iter() {
                if let Some(value) = &versioned.value {
                    visitor(key, value);
                }
            }
        }
    }

    fn keys_for(&self, segment: usize, visitor: &mut dyn FnMut(&str)) {
        if let Some(seg) = self.segments.get(segment) {
            let guard = seg.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (key, versioned) in guard.iter() {
                if versioned.value.is_some() {
                    visitor(key);
                }
            }
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        let guard = self
            .segment(key)
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(key).and_then(|v| v.value.clone())
    }

    fn put(&self, key: &str, value: Value) -> Option<Value> {
        let timestamp = self.clock.tick();
        let old = {
            let mut guard = self
                .segment(key)
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .insert(
                    key.to_string(),
                    Versioned {
                        value: Some(value.clone()),
                        timestamp,
                        identifier: self.local_identifier,
                    },
                )
                .and_then(|v| v.value)
        };
        self.record(ReplicationEntry {
            key: key.to_string(),
            value: Some(value.clone()),
            timestamp,
            identifier: self.local_identifier,
        });
        self.notify(key, old.clone(), Some(value));
        old
    }

    fn remove(&self, key: &str) -> Option<Value> {
        let timestamp = self.clock.tick();
        let old = {
            let mut guard = self
                .segment(key)
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .insert(
                    key.to_string(),
                    Versioned {
                        value: None,
                        timestamp,
                        identifier: self.local_identifier,
                    },
                )
                .and_then(|v| v.value)
        };
        self.record(ReplicationEntry {
            key: key.to_string(),
            value: None,
            timestamp,
            identifier: self.local_identifier,
        });
        if old.is_some() {
            self.notify(key, old.clone(), None);
        }
        old
    }

    fn attach_subscription(&self, subscription: Weak<SubscriptionCollection>) {
        if let Ok(mut slot) = self.subscription.write() {
            *slot = Some(subscription);
        }
    }

    fn engine_replication(self: Arc<Self>) -> Option<Arc<dyn EngineReplication>> {
        Some(self)
    }
}

impl EngineReplication for ReplicatedStore {
    fn acquire_modification_iterator(&self, remote_identifier: u8) -> Arc<dyn ModificationIterator> {
        let mut iterators = self
            .iterators
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        iterators
            .entry(remote_identifier)
            .or_insert_with(|| {
                Arc::new(LogModificationIterator {
                    remote_identifier,
                    log: self.log.clone(),
                    cursor: Mutex::new(0),
                })
            })
            .clone()
    }

    fn last_modification_time(&self, remote_identifier: u8) -> u64 {
        self.last_modification
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&remote_identifier)
            .copied()
            .unwrap_or(0)
    }

    fn apply_replication(&self, entry: ReplicationEntry) -> Result<(), ReplicationError> {
        self.clock.observe(entry.timestamp);
        {
            let mut times = self
                .last_modification
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let seen = times.entry(entry.identifier).or_insert(0);
            *seen = (*seen).max(entry.timestamp);
        }

        let incoming = Versioned {
            value: entry.value.clone(),
            timestamp: entry.timestamp,
            identifier: entry.identifier,
        };
        let old = {
            let mut guard = self
                .segment(&entry.key)
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match guard.get(&entry.key) {
                Some(current) if !incoming.supersedes(current) => {
                    tracing::debug!(
                        key = %entry.key,
                        timestamp = entry.timestamp,
                        identifier = entry.identifier,
                        "Dropped stale replication event"
                    );
                    return Ok(());
                }
                current => {
                    let old = current.and_then(|v| v.value.clone());
                    guard.insert(entry.key.clone(), incoming);
                    old
                }
            }
        };
        // Forward to peers that have not seen it; the originator's iterator
        // filters its own entries out.
        self.record(entry.clone());
        if old.is_some() || entry.value.is_some() {
            self.notify(&entry.key, old, entry.value);
        }
        Ok(())
    }
}

/// Cursor into a [`ReplicatedStore`]'s log for one remote peer.
struct LogModificationIterator {
    remote_identifier: u8,
    log: Log,
    cursor: Mutex<usize>,
}

impl ModificationIterator for LogModificationIterator {
    fn dirty_entries(&self, since: u64) {
        let log = self
            .log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // The log is commit-ordered, not timestamp-sorted: applied remote
        // events keep their original timestamps. Skip the leading run the
        // peer has already seen.
        let position = log
            .iter()
            .position(|entry| entry.timestamp > since)
            .unwrap_or(log.len());
        *self
            .cursor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = position;
    }

    fn for_each(&self, visitor: &mut dyn FnMut(&ReplicationEntry)) {
        let log = self
            .log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut cursor = self
            .cursor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for entry in log.iter().skip(*cursor) {
            if entry.identifier != self.remote_identifier {
                visitor(entry);
            }
        }
        *cursor = log.len();
    }
}
