//! The asset tree: a hierarchical namespace over stores and views.
//!
//! An asset separates identity (its path and children) from capability (the
//! views cached on it) and capability from construction policy (the
//! factories that build views). Factories are inherited along the parent
//! chain so a subtree can override how a capability is built without
//! touching tree-walking logic; view caches are strictly local.

use crate::query::RequestContext;
use crate::store::KeyValueStore;
use crate::subscription::{EntryCallback, KeyCallback, SubscriberId, TopicCallback};
use crate::view::{View, ViewKind};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Errors raised by tree resolution and view construction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TreeError {
    /// A path segment or required capability could not be resolved.
    #[error("asset not found: {0}")]
    AssetNotFound(String),
    /// No factory is registered or synthesizable for the kind.
    #[error("cannot find or build a factory for {0}")]
    FactoryNotFound(ViewKind),
    /// A child with the name is already registered under the parent.
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// The view kind cannot be built on this asset.
    #[error("unsupported view request: {kind} ({detail})")]
    UnsupportedView {
        /// The requested kind.
        kind: ViewKind,
        /// Why the request cannot be satisfied.
        detail: String,
    },
    /// The node kind cannot be created at this position.
    #[error("unsupported asset creation: {path} as {kind}")]
    UnsupportedAsset {
        /// The offending path segment.
        path: String,
        /// The requested node kind.
        kind: NodeKind,
    },
}

/// What to create for path segments that do not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Build a key-value store via the inherited store factory and wrap it.
    Map,
    /// A single entry/topic under a store-backed parent.
    Entry,
    /// A bare namespace node with no underlying resource.
    Plain,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Map => "map",
            NodeKind::Entry => "entry",
            NodeKind::Plain => "plain",
        };
        f.write_str(name)
    }
}

/// The resource an asset wraps.
#[derive(Clone)]
pub enum Item {
    /// Nothing; a pure namespace node.
    None,
    /// A key-value store.
    Store(Arc<dyn KeyValueStore>),
    /// One entry of the parent's store.
    Entry {
        /// The store holding the entry.
        store: Arc<dyn KeyValueStore>,
        /// The entry's key.
        key: String,
    },
}

impl Item {
    /// The store reachable from this item, if any.
    #[must_use]
    pub fn store(&self) -> Option<Arc<dyn KeyValueStore>> {
        match self {
            Item::None => None,
            Item::Store(store) | Item::Entry { store, .. } => Some(store.clone()),
        }
    }
}

/// Construction context handed to a [`ViewFactory`].
pub struct FactoryContext<'a> {
    /// The asset the view is being built for.
    pub asset: &'a Arc<Asset>,
    /// Parsed name and query parameters of the request.
    pub request: &'a RequestContext,
}

/// Builds one kind of view for an asset.
pub trait ViewFactory: Send + Sync {
    /// Build the view.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnsupportedView`] when the asset cannot carry
    /// the kind this factory builds.
    fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError>;
}

/// Synthesizes a missing [`ViewFactory`] on demand.
pub trait FactoryFactory: Send + Sync {
    /// Build a factory for `kind`, or `None` if this policy cannot.
    fn create(&self, kind: ViewKind) -> Option<Arc<dyn ViewFactory>>;
}

/// A named node in the hierarchical resource namespace.
pub struct Asset {
    name: String,
    parent: Weak<Asset>,
    item: Item,
    views: Mutex<HashMap<ViewKind, View>>,
    factories: Mutex<HashMap<ViewKind, Arc<dyn ViewFactory>>>,
    factory_factory: Mutex<Option<Arc<dyn FactoryFactory>>>,
    children: Mutex<BTreeMap<String, Arc<Asset>>>,
    closed: AtomicBool,
}

impl Asset {
    /// Create the root asset: empty name, no parent, no item.
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            name: String::new(),
            parent: Weak::new(),
            item: Item::None,
            views: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
            factory_factory: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn new_child(parent: &Arc<Asset>, name: &str, item: Item) -> Arc<Self> {
        debug_assert!(!name.is_empty());
        Arc::new(Self {
            name: name.to_string(),
            parent: Arc::downgrade(parent),
            item,
            views: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
            factory_factory: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// The asset's name; empty only for the root.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent asset, `None` only for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Asset>> {
        self.parent.upgrade()
    }

    /// The underlying resource.
    #[must_use]
    pub fn item(&self) -> Item {
        self.item.clone()
    }

    /// Absolute path of this asset from the root.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.parent() {
            None => "/".to_string(),
            Some(parent) => {
                let prefix = parent.full_name();
                if prefix == "/" {
                    format!("/{}", self.name)
                } else {
                    format!("{}/{}", prefix, self.name)
                }
            }
        }
    }

    /// Ordered snapshot of the children.
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Asset>> {
        lock(&self.children).values().cloned().collect()
    }

    /// Return the cached view for `kind`, or the item itself when it
    /// already satisfies the kind. Never constructs, never errors.
    #[must_use]
    pub fn get_view(&self, kind: ViewKind) -> Option<View> {
        if let Some(view) = lock(&self.views).get(&kind) {
            return Some(view.clone());
        }
        if kind == ViewKind::KeyValueStore {
            if let Item::Store(store) = &self.item {
                return Some(View::Store(store.clone()));
            }
        }
        None
    }

    /// Return the view for `kind`, building and caching it on first use.
    ///
    /// Construction is at-most-once per (asset, kind): the view cache lock
    /// is held across the factory call, so concurrent first-callers observe
    /// the same instance.
    ///
    /// # Errors
    ///
    /// Resolution errors when no factory can be found or synthesized,
    /// [`TreeError::UnsupportedView`] when the kind cannot be built here.
    pub fn acquire_view(self: &Arc<Self>, kind: ViewKind, query: &str) -> Result<View, TreeError> {
        let mut views = lock(&self.views);
        if let Some(view) = views.get(&kind) {
            return Ok(view.clone());
        }
        if kind == ViewKind::KeyValueStore {
            // The store is never built lazily on an existing asset; it either
            // is the item or was created with the asset.
            return match &self.item {
                Item::Store(store) => Ok(View::Store(store.clone())),
                _ => Err(TreeError::AssetNotFound(format!(
                    "{} view on {}",
                    kind,
                    self.full_name()
                ))),
            };
        }
        let factory = self.acquire_factory(kind)?;
        let request = RequestContext::from_query(query);
        let cx = FactoryContext {
            asset: self,
            request: &request,
        };
        let view = factory.create(&cx)?;
        views.insert(kind, view.clone());
        tracing::debug!(asset = %self.full_name(), %kind, "Built view");
        Ok(view)
    }

    /// Resolve a factory for `kind`: locally, then along the parent chain,
    /// then by synthesizing one via the nearest factory-of-factories on the
    /// way back down (caching the synthesized factory locally).
    ///
    /// # Errors
    ///
    /// [`TreeError::FactoryNotFound`] when nothing resolves.
    pub fn acquire_factory(&self, kind: ViewKind) -> Result<Arc<dyn ViewFactory>, TreeError> {
        if let Some(factory) = lock(&self.factories).get(&kind) {
            return Ok(factory.clone());
        }
        let inherited = match self.parent() {
            Some(parent) => parent.acquire_factory(kind),
            None => Err(TreeError::FactoryNotFound(kind)),
        };
        match inherited {
            Ok(factory) => Ok(factory),
            Err(TreeError::FactoryNotFound(_)) => {
                let synthesizer = lock(&self.factory_factory).clone();
                if let Some(factory) = synthesizer.and_then(|ff| ff.create(kind)) {
                    lock(&self.factories).insert(kind, factory.clone());
                    tracing::debug!(asset = %self.full_name(), %kind, "Synthesized factory");
                    return Ok(factory);
                }
                Err(TreeError::FactoryNotFound(kind))
            }
            Err(other) => Err(other),
        }
    }

    /// Install or overwrite the factory for `kind` on this asset only.
    pub fn register_factory(&self, kind: ViewKind, factory: Arc<dyn ViewFactory>) {
        lock(&self.factories).insert(kind, factory);
    }

    /// Install the factory-of-factories used when inheritance fails.
    pub fn register_factory_factory(&self, factory: Arc<dyn FactoryFactory>) {
        *lock(&self.factory_factory) = Some(factory);
    }

    /// Resolve `path`, creating missing segments according to `kind`.
    ///
    /// Segments are `/`-separated and may carry a `?key=value` query consumed
    /// by the store factory. Existing segments are reused as-is.
    ///
    /// # Errors
    ///
    /// Resolution, conflict, or unsupported-creation errors per segment.
    pub fn acquire_child(self: &Arc<Self>, path: &str, kind: NodeKind) -> Result<Arc<Asset>, TreeError> {
        match path.split_once('/') {
            Some((head, rest)) => self.child_or_create(head, kind)?.acquire_child(rest, kind),
            None => self.child_or_create(path, kind),
        }
    }

    fn child_or_create(self: &Arc<Self>, segment: &str, kind: NodeKind) -> Result<Arc<Asset>, TreeError> {
        let request = RequestContext::parse(segment);
        let mut children = lock(&self.children);
        if let Some(child) = children.get(&request.name) {
            return Ok(child.clone());
        }
        let child = match kind {
            NodeKind::Map => {
                let factory = self.acquire_factory(ViewKind::KeyValueStore)?;
                let cx = FactoryContext {
                    asset: self,
                    request: &request,
                };
                let store = factory.create(&cx)?.as_store().ok_or_else(|| {
                    TreeError::UnsupportedView {
                        kind: ViewKind::KeyValueStore,
                        detail: format!("store factory returned a non-store view for {segment}"),
                    }
                })?;
                Asset::new_child(self, &request.name, Item::Store(store))
            }
            NodeKind::Entry => match &self.item {
                Item::Store(store) => Asset::new_child(
                    self,
                    &request.name,
                    Item::Entry {
                        store: store.clone(),
                        key: request.name.clone(),
                    },
                ),
                _ => {
                    return Err(TreeError::UnsupportedAsset {
                        path: segment.to_string(),
                        kind,
                    })
                }
            },
            NodeKind::Plain => Asset::new_child(self, &request.name, Item::None),
        };
        children.insert(request.name.clone(), child.clone());
        tracing::debug!(asset = %child.full_name(), %kind, "Created asset");
        Ok(child)
    }

    /// Non-creating lookup of `path`.
    #[must_use]
    pub fn get_child(&self, path: &str) -> Option<Arc<Asset>> {
        match path.split_once('/') {
            Some((head, rest)) => lock(&self.children).get(head)?.get_child(rest),
            None => lock(&self.children).get(path).cloned(),
        }
    }

    /// Register `store` as a child named by the last segment of `name`.
    ///
    /// Ancestor segments must already exist.
    ///
    /// # Errors
    ///
    /// [`TreeError::AlreadyExists`] on a duplicate name,
    /// [`TreeError::AssetNotFound`] for a missing ancestor.
    pub fn add(self: &Arc<Self>, name: &str, store: Arc<dyn KeyValueStore>) -> Result<Arc<Asset>, TreeError> {
        if let Some((head, rest)) = name.split_once('/') {
            let parent = lock(&self.children)
                .get(head)
                .cloned()
                .ok_or_else(|| TreeError::AssetNotFound(head.to_string()))?;
            return parent.add(rest, store);
        }
        let mut children = lock(&self.children);
        if children.contains_key(name) {
            return Err(TreeError::AlreadyExists(name.to_string()));
        }
        let child = Asset::new_child(self, name, Item::Store(store));
        children.insert(name.to_string(), child.clone());
        Ok(child)
    }

    /// Remove the child named by `path` and close its subtree.
    ///
    /// Returns the detached asset; `None` when the path does not resolve.
    pub fn remove_child(&self, path: &str) -> Option<Arc<Asset>> {
        let removed = match path.rsplit_once('/') {
            Some((parent_path, leaf)) => {
                let parent = self.get_child(parent_path)?;
                // Bound so the guard drops before `parent` does.
                let mut children = lock(&parent.children);
                children.remove(leaf)
            }
            None => lock(&self.children).remove(path),
        }?;
        removed.close();
        Some(removed)
    }

    /// Release this asset's resources top-down: children first, then the
    /// view and factory caches.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let children = std::mem::take(&mut *lock(&self.children));
        for child in children.into_values() {
            child.close();
        }
        lock(&self.views).clear();
        lock(&self.factories).clear();
        *lock(&self.factory_factory) = None;
    }

    /// Whether [`Asset::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register an entry subscriber through this asset's subscription view.
    ///
    /// On entry assets the callback only observes this entry's key.
    ///
    /// # Errors
    ///
    /// Propagates view construction failures.
    pub fn register_subscriber(
        self: &Arc<Self>,
        query: &str,
        subscriber: EntryCallback,
    ) -> Result<SubscriberId, TreeError> {
        let subscription = self.acquire_subscription(query)?;
        let bootstrap = RequestContext::from_query(query).bootstrap();
        let subscriber = match &self.item {
            Item::Entry { key, .. } => {
                let key = key.clone();
                Arc::new(move |event: &crate::MapEvent| {
                    if event.key() == key {
                        subscriber(event);
                    }
                }) as EntryCallback
            }
            _ => subscriber,
        };
        Ok(subscription.register_subscriber(bootstrap, subscriber))
    }

    /// Register a key subscriber through this asset's subscription view.
    ///
    /// # Errors
    ///
    /// Propagates view construction failures.
    pub fn register_key_subscriber(
        self: &Arc<Self>,
        query: &str,
        subscriber: KeyCallback,
    ) -> Result<SubscriberId, TreeError> {
        let subscription = self.acquire_subscription(query)?;
        let bootstrap = RequestContext::from_query(query).bootstrap();
        let subscriber = match &self.item {
            Item::Entry { key, .. } => {
                let key = key.clone();
                Arc::new(move |k: &str| {
                    if k == key {
                        subscriber(k);
                    }
                }) as KeyCallback
            }
            _ => subscriber,
        };
        Ok(subscription.register_key_subscriber(bootstrap, subscriber))
    }

    /// Register a topic subscriber through this asset's subscription view.
    ///
    /// # Errors
    ///
    /// Propagates view construction failures.
    pub fn register_topic_subscriber(
        self: &Arc<Self>,
        query: &str,
        subscriber: TopicCallback,
    ) -> Result<SubscriberId, TreeError> {
        let subscription = self.acquire_subscription(query)?;
        let bootstrap = RequestContext::from_query(query).bootstrap();
        let subscriber = match &self.item {
            Item::Entry { key, .. } => {
                let key = key.clone();
                Arc::new(move |k: &str, v: Option<&serde_json::Value>| {
                    if k == key {
                        subscriber(k, v);
                    }
                }) as TopicCallback
            }
            _ => subscriber,
        };
        Ok(subscription.register_topic_subscriber(bootstrap, subscriber))
    }

    /// Remove an entry or key subscriber. A missing subscription view means
    /// there is nothing to unregister; that is a no-op, not an error.
    pub fn unregister_subscriber(&self, id: SubscriberId) {
        if let Some(subscription) = self
            .get_view(ViewKind::Subscription)
            .and_then(|v| v.as_subscription())
        {
            subscription.unregister_subscriber(id);
        }
    }

    /// Remove a topic subscriber; no-op when no subscription view exists.
    pub fn unregister_topic_subscriber(&self, id: SubscriberId) {
        if let Some(subscription) = self
            .get_view(ViewKind::Subscription)
            .and_then(|v| v.as_subscription())
        {
            subscription.unregister_topic_subscriber(id);
        }
    }

    fn acquire_subscription(
        self: &Arc<Self>,
        query: &str,
    ) -> Result<Arc<crate::SubscriptionCollection>, TreeError> {
        self.acquire_view(ViewKind::Subscription, query)?
            .as_subscription()
            .ok_or_else(|| TreeError::UnsupportedView {
                kind: ViewKind::Subscription,
                detail: format!("subscription factory returned a different view on {}", self.full_name()),
            })
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let item = match &self.item {
            Item::None => "node",
            Item::Store(_) => "store",
            Item::Entry { .. } => "entry",
        };
        write!(f, "{}@{}", item, self.full_name())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;
    use crate::store::MemoryStore;
    use crate::subscription::SubscriptionCollection;
    use crate::view::MapView;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn grid() -> Arc<Asset> {
        let root = Asset::root();
        defaults::install(&root);
        root
    }

    struct CountingMapFactory {
        builds: AtomicUsize,
    }

    impl ViewFactory for CountingMapFactory {
        fn create(&self, cx: &FactoryContext<'_>) -> Result<View, TreeError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            match cx.asset.item() {
                Item::Store(store) => Ok(View::Map(MapView::new(store))),
                _ => Err(TreeError::UnsupportedView {
                    kind: ViewKind::Map,
                    detail: "no store".to_string(),
                }),
            }
        }
    }

    #[test]
    fn concurrent_acquire_builds_once() {
        let root = grid();
        let asset = root.acquire_child("prices", NodeKind::Map).unwrap();
        let factory = Arc::new(CountingMapFactory {
            builds: AtomicUsize::new(0),
        });
        asset.register_factory(ViewKind::Map, factory.clone());

        let views: Vec<View> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let asset = asset.clone();
                    scope.spawn(move || asset.acquire_view(ViewKind::Map, "").unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        let View::Map(first) = &views[0] else {
            panic!("expected a map view")
        };
        for view in &views {
            let View::Map(map) = view else {
                panic!("expected a map view")
            };
            assert!(Arc::ptr_eq(first, map));
        }
    }

    #[test]
    fn factory_registered_at_root_is_inherited() {
        let root = grid();
        let factory = Arc::new(CountingMapFactory {
            builds: AtomicUsize::new(0),
        });
        root.register_factory(ViewKind::Map, factory.clone());

        let leaf = root.acquire_child("a/b/c", NodeKind::Map).unwrap();
        leaf.acquire_view(ViewKind::Map, "").unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subtree_factory_shadows_root_factory() {
        let root = grid();
        let root_factory = Arc::new(CountingMapFactory {
            builds: AtomicUsize::new(0),
        });
        root.register_factory(ViewKind::Map, root_factory.clone());

        let subtree = root.acquire_child("sub", NodeKind::Map).unwrap();
        let subtree_factory = Arc::new(CountingMapFactory {
            builds: AtomicUsize::new(0),
        });
        subtree.register_factory(ViewKind::Map, subtree_factory.clone());

        let leaf = subtree.acquire_child("leaf", NodeKind::Map).unwrap();
        leaf.acquire_view(ViewKind::Map, "").unwrap();

        assert_eq!(root_factory.builds.load(Ordering::SeqCst), 0);
        assert_eq!(subtree_factory.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_of_factories_synthesizes_and_caches() {
        let root = grid();
        let asset = root.acquire_child("m", NodeKind::Map).unwrap();
        // No explicit Map factory anywhere; the root factory-of-factories
        // synthesizes one on first use.
        let view = asset.acquire_view(ViewKind::Map, "").unwrap();
        assert_eq!(view.kind(), ViewKind::Map);
        // Synthesized factories are cached on the asset that resolved them.
        assert!(root.acquire_factory(ViewKind::Map).is_ok());
    }

    #[test]
    fn missing_factory_is_a_resolution_error() {
        let root = Asset::root();
        let Err(err) = root.acquire_factory(ViewKind::Map) else {
            panic!("expected resolution to fail on a bare root")
        };
        assert!(matches!(err, TreeError::FactoryNotFound(ViewKind::Map)));
    }

    #[test]
    fn path_resolution_creates_each_segment_once() {
        let root = grid();
        let leaf = root.acquire_child("a/b/c", NodeKind::Map).unwrap();
        assert_eq!(leaf.full_name(), "/a/b/c");
        assert!(root.get_child("a").is_some());
        assert!(root.get_child("a/b").is_some());

        let again = root.acquire_child("a/b/c", NodeKind::Map).unwrap();
        assert!(Arc::ptr_eq(&leaf, &again));
        assert_eq!(root.get_child("a").unwrap().children().len(), 1);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let root = grid();
        let first = root.add("x", MemoryStore::new(1)).unwrap();
        first.acquire_view(ViewKind::Map, "").unwrap();

        let err = root.add("x", MemoryStore::new(1)).unwrap_err();
        assert!(matches!(err, TreeError::AlreadyExists(name) if name == "x"));

        // The first child is unaffected.
        let child = root.get_child("x").unwrap();
        assert!(Arc::ptr_eq(&first, &child));
    }

    #[test]
    fn get_view_never_constructs() {
        let root = grid();
        let asset = root.acquire_child("m", NodeKind::Map).unwrap();
        assert!(asset.get_view(ViewKind::Map).is_none());
        assert!(asset.get_view(ViewKind::KeyValueStore).is_some());
        asset.acquire_view(ViewKind::Map, "").unwrap();
        assert!(asset.get_view(ViewKind::Map).is_some());
    }

    #[test]
    fn unsupported_view_names_the_kind() {
        let root = grid();
        let bare = root.acquire_child("ns", NodeKind::Plain).unwrap();
        let err = bare.acquire_view(ViewKind::Map, "").unwrap_err();
        assert!(matches!(err, TreeError::UnsupportedView { kind: ViewKind::Map, .. }));
    }

    #[test]
    fn entry_creation_requires_a_store_parent() {
        let root = grid();
        let err = root.acquire_child("topic", NodeKind::Entry).unwrap_err();
        assert!(matches!(err, TreeError::UnsupportedAsset { kind: NodeKind::Entry, .. }));

        let map = root.acquire_child("m", NodeKind::Map).unwrap();
        let entry = map.acquire_child("topic", NodeKind::Entry).unwrap();
        assert!(matches!(entry.item(), Item::Entry { .. }));
    }

    #[test]
    fn remove_child_closes_the_subtree() {
        let root = grid();
        let leaf = root.acquire_child("a/b", NodeKind::Map).unwrap();
        leaf.acquire_view(ViewKind::Map, "").unwrap();

        let removed = root.remove_child("a").unwrap();
        assert!(removed.is_closed());
        assert!(leaf.is_closed());
        assert!(leaf.get_view(ViewKind::Map).is_none());
        assert!(root.get_child("a").is_none());
        assert!(root.remove_child("a").is_none());
    }

    #[test]
    fn subscribers_flow_through_the_tree() {
        let root = grid();
        let asset = root.acquire_child("m", NodeKind::Map).unwrap();
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        let id = asset
            .register_subscriber(
                "",
                Arc::new(move |event: &crate::MapEvent| {
                    sink.lock().unwrap().push(event.clone());
                }),
            )
            .unwrap();

        let View::Map(map) = asset.acquire_view(ViewKind::Map, "").unwrap() else {
            panic!("expected a map view")
        };
        map.insert("k", json!(1));
        map.remove("k");
        assert_eq!(events.lock().unwrap().len(), 2);

        asset.unregister_subscriber(id);
        map.insert("k2", json!(2));
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn unregister_without_subscription_view_is_a_no_op() {
        let root = grid();
        let asset = root.acquire_child("m", NodeKind::Map).unwrap();
        asset.unregister_subscriber(uuid::Uuid::new_v4());
        asset.unregister_topic_subscriber(uuid::Uuid::new_v4());
        assert!(asset.get_view(ViewKind::Subscription).is_none());
    }

    #[test]
    fn entry_asset_filters_to_its_own_key() {
        let root = grid();
        let map_asset = root.acquire_child("m", NodeKind::Map).unwrap();
        let entry = map_asset.acquire_child("t1", NodeKind::Entry).unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        entry
            .register_topic_subscriber(
                "bootstrap=false",
                Arc::new(move |key: &str, value: Option<&Value>| {
                    sink.lock().unwrap().push((key.to_string(), value.cloned()));
                }),
            )
            .unwrap();

        let View::Map(map) = map_asset.acquire_view(ViewKind::Map, "").unwrap() else {
            panic!("expected a map view")
        };
        map.insert("t1", json!("mine"));
        map.insert("t2", json!("other"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("t1".to_string(), Some(json!("mine")))]);
    }

    struct CountingStore {
        visits: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn segments(&self) -> usize {
            2
        }
        fn entries_for(&self, _segment: usize, _visitor: &mut dyn FnMut(&str, &Value)) {
            self.visits.fetch_add(1, Ordering::SeqCst);
        }
        fn keys_for(&self, _segment: usize, _visitor: &mut dyn FnMut(&str)) {
            self.visits.fetch_add(1, Ordering::SeqCst);
        }
        fn get(&self, _key: &str) -> Option<Value> {
            None
        }
        fn put(&self, _key: &str, _value: Value) -> Option<Value> {
            None
        }
        fn remove(&self, _key: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn bootstrap_false_touches_no_store_state() {
        let root = grid();
        let store = Arc::new(CountingStore {
            visits: AtomicUsize::new(0),
        });
        let asset = root.add("stub", store.clone()).unwrap();
        asset
            .register_subscriber("bootstrap=false", Arc::new(|_| {}))
            .unwrap();
        assert_eq!(store.visits.load(Ordering::SeqCst), 0);

        // No observers at all: notification is a pure fast path.
        let collection = SubscriptionCollection::new(store.clone());
        collection.notify_update("k", None, json!(1));
        assert_eq!(store.visits.load(Ordering::SeqCst), 0);
    }
}
