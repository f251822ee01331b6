//! The key-value store contract and a plain in-memory implementation.
//!
//! A store is a fixed number of independent segments. `entries_for` and
//! `keys_for` visit one segment's live entries at the time of the call; there
//! is no ordering across segments and no guarantee of visiting entries
//! inserted mid-visit. Views and bootstrap replay treat this as the sole read
//! path over existing state.

use crate::subscription::SubscriptionCollection;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock, Weak};

/// Default segment count when a store factory query does not specify one.
pub const DEFAULT_SEGMENTS: usize = 8;

/// A segmented key-value store.
///
/// Mutations notify the attached [`SubscriptionCollection`], if any, after
/// the segment lock is released. Keys are canonical strings; values are JSON.
pub trait KeyValueStore: Send + Sync {
    /// Number of independent segments.
    fn segments(&self) -> usize;

    /// Visit every live entry of one segment.
    fn entries_for(&self, segment: usize, visitor: &mut dyn FnMut(&str, &Value));

    /// Visit every live key of one segment.
    fn keys_for(&self, segment: usize, visitor: &mut dyn FnMut(&str));

    /// Read a value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Insert or update a value, returning the previous one.
    fn put(&self, key: &str, value: Value) -> Option<Value>;

    /// Remove a key, returning the previous value.
    fn remove(&self, key: &str) -> Option<Value>;

    /// Attach the observer collection mutations should notify.
    ///
    /// The reference is weak: the collection is owned by the asset tree's
    /// view cache, not by the store.
    fn attach_subscription(&self, _subscription: Weak<SubscriptionCollection>) {}

    /// The replication contract of this store, when it has one.
    fn engine_replication(self: Arc<Self>) -> Option<Arc<dyn crate::EngineReplication>> {
        None
    }
}

/// Map a key to its owning segment.
#[must_use]
pub fn segment_for(key: &str, segments: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % segments.max(1)
}

/// A plain in-memory segmented store.
pub struct MemoryStore {
    segments: Vec<RwLock<HashMap<String, Value>>>,
    subscription: RwLock<Option<Weak<SubscriptionCollection>>>,
}

impl MemoryStore {
    /// Create a store with the given number of segments (at least one).
    #[must_use]
    pub fn new(segments: usize) -> Arc<Self> {
        let segments = segments.max(1);
        Arc::new(Self {
            segments: (0..segments).map(|_| RwLock::new(HashMap::new())).collect(),
            subscription: RwLock::new(None),
        })
    }

    fn notify_update(&self, key: &str, old: Option<Value>, value: Value) {
        if let Some(sub) = self.live_subscription() {
            sub.notify_update(key, old, value);
        }
    }

    fn notify_removal(&self, key: &str, old: Option<Value>) {
        if let Some(sub) = self.live_subscription() {
            sub.notify_removal(key, old);
        }
    }

    fn live_subscription(&self) -> Option<Arc<SubscriptionCollection>> {
        self.subscription
            .read()
            .ok()?
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl KeyValueStore for MemoryStore {
    fn segments(&self) -> usize {
        self.segments.len()
    }

    fn entries_for(&self, segment: usize, visitor: &mut dyn FnMut(&str, &Value)) {
        if let Some(seg) = self.segments.get(segment) {
            let guard = seg.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (key, value) in guard.iter() {
                visitor(key, value);
            }
        }
    }

    fn keys_for(&self, segment: usize, visitor: &mut dyn FnMut(&str)) {
        if let Some(seg) = self.segments.get(segment) {
            let guard = seg.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            for key in guard.keys() {
                visitor(key);
            }
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        let seg = &self.segments[segment_for(key, self.segments.len())];
        let guard = seg.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Option<Value> {
        let old = {
            let seg = &self.segments[segment_for(key, self.segments.len())];
            let mut guard = seg
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.insert(key.to_string(), value.clone())
        };
        self.notify_update(key, old.clone(), value);
        old
    }

    fn remove(&self, key: &str) -> Option<Value> {
        let old = {
            let seg = &self.segments[segment_for(key, self.segments.len())];
            let mut guard = seg
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.remove(key)
        };
        if old.is_some() {
            self.notify_removal(key, old.clone());
        }
        old
    }

    fn attach_subscription(&self, subscription: Weak<SubscriptionCollection>) {
        if let Ok(mut slot) = self.subscription.write() {
            *slot = Some(subscription);
        }
    }
}
