//! The standard factory set.
//!
//! [`install`] puts two things on a root asset: the store factory and a
//! factory-of-factories that synthesizes the remaining view factories on
//! demand. Everything else in the tree inherits them; a subtree can shadow
//! any of them with [`crate::Asset::register_factory`].

use crate::replication::ReplicatedStore;
use crate::store::{KeyValueStore, MemoryStore, DEFAULT_SEGMENTS};
use crate::subscription::SubscriptionCollection;
use crate::tree::{Asset, FactoryContext, FactoryFactory, Item, TreeError, ViewFactory};
use crate::view::{EntrySetView, MapView, TopicPublisher, View, ViewKind};
use std::sync::Arc;

/// Install the standard factories on a (root) asset.
pub fn install(root: &Arc<Asset>) {
    root.register_factory(ViewKind::KeyValueStore, Arc::new(StoreFactory));
    root.register_factory_factory(Arc::new(StandardFactoryFactory));
}

/// Builds in-memory stores; `replicated=true` with `identifier=N` selects a
/// replicated store, `segments=N` sets the shard count.
pub struct StoreFactory;

impl ViewFactory for StoreFactory {
    fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError> {
        let segments = cx.request.segments().unwrap_or(DEFAULT_SEGMENTS);
        let store: Arc<dyn KeyValueStore> = if cx.request.replicated() {
            let identifier = cx.request.identifier().unwrap_or_default();
            ReplicatedStore::new(identifier, segments)
        } else {
            MemoryStore::new(segments)
        };
        tracing::debug!(
            name = %cx.request.name,
            segments,
            replicated = cx.request.replicated(),
            "Built store"
        );
        Ok(View::Store(store))
    }
}

struct MapViewFactory;

impl ViewFactory for MapViewFactory {
    fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError> {
        match cx.asset.item() {
            Item::Store(store) => Ok(View::Map(MapView::new(store))),
            _ => Err(unsupported(ViewKind::Map, cx.asset)),
        }
    }
}

struct EntrySetFactory;

impl ViewFactory for EntrySetFactory {
    fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError> {
        match cx.asset.item() {
            Item::Store(store) => Ok(View::EntrySet(EntrySetView::new(store))),
            _ => Err(unsupported(ViewKind::EntrySet, cx.asset)),
        }
    }
}

struct TopicPublisherFactory;

impl ViewFactory for TopicPublisherFactory {
    fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError> {
        match cx.asset.item() {
            Item::Store(store) => Ok(View::Topic(TopicPublisher::new(store, None))),
            Item::Entry { store, key } => Ok(View::Topic(TopicPublisher::new(store, Some(key)))),
            Item::None => Err(unsupported(ViewKind::TopicPublisher, cx.asset)),
        }
    }
}

/// Builds the subscription collection for a store asset and attaches it to
/// the store; entry assets share their parent store's collection.
struct SubscriptionFactory;

impl ViewFactory for SubscriptionFactory {
    fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError> {
        match cx.asset.item() {
            Item::Store(store) => {
                let collection = SubscriptionCollection::new(store.clone());
                store.attach_subscription(Arc::downgrade(&collection));
                Ok(View::Subscription(collection))
            }
            Item::Entry { .. } => {
                let parent = cx.asset.parent().ok_or_else(|| {
                    unsupported(ViewKind::Subscription, cx.asset)
                })?;
                parent.acquire_view(ViewKind::Subscription, "")
            }
            Item::None => Err(unsupported(ViewKind::Subscription, cx.asset)),
        }
    }
}

/// Synthesizes any of the standard view factories.
pub struct StandardFactoryFactory;

impl FactoryFactory for StandardFactoryFactory {
    fn create(&self, kind: ViewKind) -> Option<Arc<dyn ViewFactory>> {
        match kind {
            ViewKind::KeyValueStore => Some(Arc::new(StoreFactory)),
            ViewKind::Map => Some(Arc::new(MapViewFactory)),
            ViewKind::EntrySet => Some(Arc::new(EntrySetFactory)),
            ViewKind::TopicPublisher => Some(Arc::new(TopicPublisherFactory)),
            ViewKind::Subscription => Some(Arc::new(SubscriptionFactory)),
        }
    }
}

fn unsupported(kind: ViewKind, asset: &Arc<Asset>) -> TreeError {
    TreeError::UnsupportedView {
        kind,
        detail: format!("no backing store on {}", asset.full_name()),
    }
}
