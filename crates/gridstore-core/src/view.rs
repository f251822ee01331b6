//! Typed views materialized over an asset's underlying store.
//!
//! Capabilities form a closed set: [`ViewKind`] names what can be requested,
//! [`View`] holds what was built. Each asset caches at most one view per
//! kind; the views themselves are stateless beyond what construction
//! captured.

use crate::store::KeyValueStore;
use crate::subscription::SubscriptionCollection;
use crate::tree::TreeError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The closed set of view capabilities an asset can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// The raw segmented store.
    KeyValueStore,
    /// A map adapter over the store.
    Map,
    /// An entry-set adapter over the store.
    EntrySet,
    /// A publisher of `(topic, value)` messages backed by the store.
    TopicPublisher,
    /// The observer collection for the store.
    Subscription,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViewKind::KeyValueStore => "key-value-store",
            ViewKind::Map => "map",
            ViewKind::EntrySet => "entry-set",
            ViewKind::TopicPublisher => "topic-publisher",
            ViewKind::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

/// A built view instance, cached per (asset, kind).
#[derive(Clone)]
pub enum View {
    /// The raw store.
    Store(Arc<dyn KeyValueStore>),
    /// A map view.
    Map(Arc<MapView>),
    /// An entry-set view.
    EntrySet(Arc<EntrySetView>),
    /// A topic publisher.
    Topic(Arc<TopicPublisher>),
    /// A subscription collection.
    Subscription(Arc<SubscriptionCollection>),
}

impl View {
    /// The kind this view satisfies.
    #[must_use]
    pub fn kind(&self) -> ViewKind {
        match self {
            View::Store(_) => ViewKind::KeyValueStore,
            View::Map(_) => ViewKind::Map,
            View::EntrySet(_) => ViewKind::EntrySet,
            View::Topic(_) => ViewKind::TopicPublisher,
            View::Subscription(_) => ViewKind::Subscription,
        }
    }

    /// The store behind this view, if the kind exposes one.
    #[must_use]
    pub fn as_store(&self) -> Option<Arc<dyn KeyValueStore>> {
        match self {
            View::Store(store) => Some(store.clone()),
            View::Map(map) => Some(map.store()),
            _ => None,
        }
    }

    /// The subscription collection, for [`ViewKind::Subscription`] views.
    #[must_use]
    pub fn as_subscription(&self) -> Option<Arc<SubscriptionCollection>> {
        match self {
            View::Subscription(sub) => Some(sub.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View::{}", self.kind())
    }
}

/// A map adapter over a store. Mutations flow through the store, which
/// notifies the attached subscription collection.
pub struct MapView {
    store: Arc<dyn KeyValueStore>,
}

impl MapView {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    /// Insert or update, returning the previous value.
    pub fn insert(&self, key: &str, value: Value) -> Option<Value> {
        self.store.put(key, value)
    }

    /// Remove, returning the previous value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.store.remove(key)
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.store.get(key).is_some()
    }

    /// Number of live entries across all segments.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        for segment in 0..self.store.segments() {
            self.store.keys_for(segment, &mut |_| count += 1);
        }
        count
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An entry-set adapter: whole-map visitation in segment order.
pub struct EntrySetView {
    store: Arc<dyn KeyValueStore>,
}

impl EntrySetView {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Visit every live entry, segment by segment.
    pub fn for_each(&self, visitor: &mut dyn FnMut(&str, &Value)) {
        for segment in 0..self.store.segments() {
            self.store.entries_for(segment, visitor);
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.for_each(&mut |_, _| count += 1);
        count
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A publisher of values keyed by topic, backed by a store.
///
/// Built on a store asset the topic must be named per publish; built on an
/// entry asset the topic is fixed to that entry's key.
pub struct TopicPublisher {
    store: Arc<dyn KeyValueStore>,
    topic: Option<String>,
}

impl TopicPublisher {
    /// Create a publisher; `topic` fixes the destination key when present.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, topic: Option<String>) -> Arc<Self> {
        Arc::new(Self { store, topic })
    }

    /// Publish to the fixed topic.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnsupportedView`] when the publisher has no
    /// fixed topic.
    pub fn publish(&self, value: Value) -> Result<(), TreeError> {
        match &self.topic {
            Some(topic) => {
                self.store.put(topic, value);
                Ok(())
            }
            None => Err(TreeError::UnsupportedView {
                kind: ViewKind::TopicPublisher,
                detail: "publish without a topic on a store-level publisher".to_string(),
            }),
        }
    }

    /// Publish to a named topic.
    pub fn publish_to(&self, topic: &str, value: Value) {
        self.store.put(topic, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn map_view_round_trips_through_store() {
        let store = MemoryStore::new(4);
        let map = MapView::new(store.clone());
        assert!(map.is_empty());
        map.insert("a", json!(1));
        assert!(map.contains_key("a"));
        assert_eq!(store.get("a"), Some(json!(1)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove("a"), Some(json!(1)));
        assert!(map.is_empty());
    }

    #[test]
    fn entry_set_visits_everything() {
        let store = MemoryStore::new(2);
        store.put("a", json!(1));
        store.put("b", json!(2));
        let entries = EntrySetView::new(store);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn topic_publisher_fixed_and_named() {
        let store = MemoryStore::new(1);
        let publisher = TopicPublisher::new(store.clone(), Some("t".to_string()));
        publisher.publish(json!("x")).unwrap();
        assert_eq!(store.get("t"), Some(json!("x")));

        let unfixed = TopicPublisher::new(store.clone(), None);
        assert!(unfixed.publish(json!("y")).is_err());
        unfixed.publish_to("u", json!("y"));
        assert_eq!(store.get("u"), Some(json!("y")));
    }
}
