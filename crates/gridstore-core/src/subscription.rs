//! Per-resource observer collections.
//!
//! One collection exists per store that has subscribers. Mutations on the
//! backing store fan out in a fixed order: topic subscribers first (bare
//! `(key, value-or-absent)` pairs), then entry subscribers (tagged
//! insert/update/remove events), then key subscribers.
//!
//! Registration may request bootstrap replay: existing store state is
//! synthesized as insert events before live delivery. Replay takes no store
//! lock, so a concurrent mutation may be observed twice or only via one of
//! the two paths; observers converge on the current state eventually.

use crate::store::KeyValueStore;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Token identifying one registered observer, used for unregistration.
pub type SubscriberId = Uuid;

/// A tagged mutation event delivered to entry subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// A key that had no previous value was set.
    Inserted {
        /// The affected key.
        key: String,
        /// The new value.
        value: Value,
    },
    /// An existing key was overwritten.
    Updated {
        /// The affected key.
        key: String,
        /// The previous value.
        old: Value,
        /// The new value.
        new: Value,
    },
    /// A key was removed.
    Removed {
        /// The affected key.
        key: String,
        /// The value it held.
        old: Value,
    },
}

impl MapEvent {
    /// The key this event concerns.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            MapEvent::Inserted { key, .. }
            | MapEvent::Updated { key, .. }
            | MapEvent::Removed { key, .. } => key,
        }
    }
}

/// Observer of tagged entry events.
pub type EntryCallback = Arc<dyn Fn(&MapEvent) + Send + Sync>;
/// Observer of bare keys.
pub type KeyCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Observer of `(key, value-or-absent)` pairs; `None` signals removal.
pub type TopicCallback = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Observer sets for one store.
pub struct SubscriptionCollection {
    store: Arc<dyn KeyValueStore>,
    entry_subscribers: RwLock<Vec<(SubscriberId, EntryCallback)>>,
    key_subscribers: RwLock<Vec<(SubscriberId, KeyCallback)>>,
    topic_subscribers: RwLock<Vec<(SubscriberId, TopicCallback)>>,
    has_subscribers: AtomicBool,
}

impl SubscriptionCollection {
    /// Create a collection over the store whose state replay reads.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            entry_subscribers: RwLock::new(Vec::new()),
            key_subscribers: RwLock::new(Vec::new()),
            topic_subscribers: RwLock::new(Vec::new()),
            has_subscribers: AtomicBool::new(false),
        })
    }

    /// Whether any observer is registered.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.has_subscribers.load(Ordering::Acquire)
    }

    /// Notify observers of an insert (`old` absent) or update.
    pub fn notify_update(&self, key: &str, old: Option<Value>, value: Value) {
        if self.has_subscribers() {
            self.notify_update0(key, old, value);
        }
    }

    fn notify_update0(&self, key: &str, old: Option<Value>, value: Value) {
        for (_, subscriber) in self.snapshot(&self.topic_subscribers) {
            subscriber(key, Some(&value));
        }
        let entry_subscribers = self.snapshot(&self.entry_subscribers);
        if !entry_subscribers.is_empty() {
            let event = match old {
                None => MapEvent::Inserted {
                    key: key.to_string(),
                    value,
                },
                Some(old) => MapEvent::Updated {
                    key: key.to_string(),
                    old,
                    new: value,
                },
            };
            for (_, subscriber) in entry_subscribers {
                subscriber(&event);
            }
        }
        for (_, subscriber) in self.snapshot(&self.key_subscribers) {
            subscriber(key);
        }
    }

    /// Notify observers of a removal.
    pub fn notify_removal(&self, key: &str, old: Option<Value>) {
        if self.has_subscribers() {
            self.notify_removal0(key, old);
        }
    }

    fn notify_removal0(&self, key: &str, old: Option<Value>) {
        for (_, subscriber) in self.snapshot(&self.topic_subscribers) {
            subscriber(key, None);
        }
        let entry_subscribers = self.snapshot(&self.entry_subscribers);
        if !entry_subscribers.is_empty() {
            let event = MapEvent::Removed {
                key: key.to_string(),
                old: old.unwrap_or(Value::Null),
            };
            for (_, subscriber) in entry_subscribers {
                subscriber(&event);
            }
        }
        for (_, subscriber) in self.snapshot(&self.key_subscribers) {
            subscriber(key);
        }
    }

    /// Register an entry subscriber, optionally replaying existing state as
    /// insert events first.
    pub fn register_subscriber(&self, bootstrap: bool, subscriber: EntryCallback) -> SubscriberId {
        let id = Uuid::new_v4();
        write_lock(&self.entry_subscribers).push((id, subscriber.clone()));
        if bootstrap {
            for segment in 0..self.store.segments() {
                self.store.entries_for(segment, &mut |key, value| {
                    subscriber(&MapEvent::Inserted {
                        key: key.to_string(),
                        value: value.clone(),
                    });
                });
            }
        }
        self.has_subscribers.store(true, Ordering::Release);
        tracing::debug!(subscriber = %id, bootstrap, "Registered entry subscriber");
        id
    }

    /// Register a key subscriber, optionally replaying existing keys first.
    pub fn register_key_subscriber(&self, bootstrap: bool, subscriber: KeyCallback) -> SubscriberId {
        let id = Uuid::new_v4();
        write_lock(&self.key_subscribers).push((id, subscriber.clone()));
        if bootstrap {
            for segment in 0..self.store.segments() {
                self.store.keys_for(segment, &mut |key| subscriber(key));
            }
        }
        self.has_subscribers.store(true, Ordering::Release);
        tracing::debug!(subscriber = %id, bootstrap, "Registered key subscriber");
        id
    }

    /// Register a topic subscriber, optionally replaying existing entries as
    /// `(key, value)` pairs first.
    pub fn register_topic_subscriber(
        &self,
        bootstrap: bool,
        subscriber: TopicCallback,
    ) -> SubscriberId {
        let id = Uuid::new_v4();
        write_lock(&self.topic_subscribers).push((id, subscriber.clone()));
        if bootstrap {
            for segment in 0..self.store.segments() {
                self.store
                    .entries_for(segment, &mut |key, value| subscriber(key, Some(value)));
            }
        }
        self.has_subscribers.store(true, Ordering::Release);
        tracing::debug!(subscriber = %id, bootstrap, "Registered topic subscriber");
        id
    }

    /// Remove an entry or key subscriber. Unknown ids are a no-op.
    pub fn unregister_subscriber(&self, id: SubscriberId) {
        write_lock(&self.entry_subscribers).retain(|(sid, _)| *sid != id);
        write_lock(&self.key_subscribers).retain(|(sid, _)| *sid != id);
        self.recompute_flag();
    }

    /// Remove a topic subscriber. Unknown ids are a no-op.
    pub fn unregister_topic_subscriber(&self, id: SubscriberId) {
        write_lock(&self.topic_subscribers).retain(|(sid, _)| *sid != id);
        self.recompute_flag();
    }

    fn recompute_flag(&self) {
        let any = !read_lock(&self.entry_subscribers).is_empty()
            || !read_lock(&self.key_subscribers).is_empty()
            || !read_lock(&self.topic_subscribers).is_empty();
        self.has_subscribers.store(any, Ordering::Release);
    }

    fn snapshot<T: Clone>(&self, set: &RwLock<Vec<T>>) -> Vec<T> {
        read_lock(set).clone()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Mutex;

    fn collecting_entry(events: &Arc<Mutex<Vec<MapEvent>>>) -> EntryCallback {
        let events = events.clone();
        Arc::new(move |event| events.lock().unwrap().push(event.clone()))
    }

    #[test]
    fn update_and_removal_tagging() {
        let store = MemoryStore::new(1);
        let collection = SubscriptionCollection::new(store);
        let events = Arc::new(Mutex::new(Vec::new()));
        collection.register_subscriber(false, collecting_entry(&events));

        collection.notify_update("k", None, json!(1));
        collection.notify_update("k", Some(json!(1)), json!(2));
        collection.notify_removal("k", Some(json!(2)));

        let events = events.lock().unwrap();
        assert_eq!(
            events[0],
            MapEvent::Inserted {
                key: "k".into(),
                value: json!(1)
            }
        );
        assert_eq!(
            events[1],
            MapEvent::Updated {
                key: "k".into(),
                old: json!(1),
                new: json!(2)
            }
        );
        assert_eq!(
            events[2],
            MapEvent::Removed {
                key: "k".into(),
                old: json!(2)
            }
        );
    }

    #[test]
    fn topic_subscriber_sees_value_and_absence() {
        let store = MemoryStore::new(1);
        let collection = SubscriptionCollection::new(store);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        collection.register_topic_subscriber(
            false,
            Arc::new(move |key, value| {
                sink.lock().unwrap().push((key.to_string(), value.cloned()));
            }),
        );

        collection.notify_update("k", Some(json!(1)), json!(2));
        collection.notify_removal("k", Some(json!(2)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ("k".to_string(), Some(json!(2))));
        assert_eq!(seen[1], ("k".to_string(), None));
    }

    #[test]
    fn bootstrap_replays_every_segment_once() {
        let store = MemoryStore::new(2);
        store.put("k1", json!("v1"));
        store.put("k2", json!("v2"));
        let collection = SubscriptionCollection::new(store);

        let events = Arc::new(Mutex::new(Vec::new()));
        collection.register_subscriber(true, collecting_entry(&events));

        let mut keys: Vec<String> = events
            .lock()
            .unwrap()
            .iter()
            .map(|e| {
                assert!(matches!(e, MapEvent::Inserted { .. }));
                e.key().to_string()
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[test]
    fn bootstrap_replays_topic_pairs() {
        let store = MemoryStore::new(2);
        store.put("k1", json!("v1"));
        store.put("k2", json!("v2"));
        let collection = SubscriptionCollection::new(store);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        collection.register_topic_subscriber(
            true,
            Arc::new(move |key, value| {
                sink.lock().unwrap().push((key.to_string(), value.cloned()));
            }),
        );

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                ("k1".to_string(), Some(json!("v1"))),
                ("k2".to_string(), Some(json!("v2"))),
            ]
        );
    }

    #[test]
    fn bootstrap_replays_bare_keys() {
        let store = MemoryStore::new(2);
        store.put("k1", json!(1));
        store.put("k2", json!(2));
        let collection = SubscriptionCollection::new(store);

        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = keys.clone();
        collection.register_key_subscriber(
            true,
            Arc::new(move |key| sink.lock().unwrap().push(key.to_string())),
        );

        let mut keys = keys.lock().unwrap().clone();
        keys.sort();
        assert_eq!(keys, vec!["k1", "k2"]);
    }

    #[test]
    fn no_subscribers_fast_path() {
        let store = MemoryStore::new(1);
        let collection = SubscriptionCollection::new(store);
        assert!(!collection.has_subscribers());
        // Must not panic or touch any observer set.
        collection.notify_update("k", None, json!(1));
        collection.notify_removal("k", None);
    }

    #[test]
    fn unregister_restores_fast_path() {
        let store = MemoryStore::new(1);
        let collection = SubscriptionCollection::new(store);
        let events = Arc::new(Mutex::new(Vec::new()));
        let id = collection.register_subscriber(false, collecting_entry(&events));
        let topic_id = collection.register_topic_subscriber(false, Arc::new(|_, _| {}));
        assert!(collection.has_subscribers());

        collection.unregister_subscriber(id);
        assert!(collection.has_subscribers());

        collection.unregister_topic_subscriber(topic_id);
        assert!(!collection.has_subscribers());

        collection.notify_update("k", None, json!(1));
        assert!(events.lock().unwrap().is_empty());
    }
}
