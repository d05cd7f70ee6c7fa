//! Path-addressed store collection with pluggable caching, creation, and
//! eviction (spec §3 "Client", §4.8).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::context::{ClientBackRefKey, Context};
use crate::error::CoreError;
use crate::operation::Operation;
use crate::path::Path;
use crate::state::Reducer;
use crate::store::{AnyStore, Store};

/// Object-safe key-value contract a [`Client`] delegates storage to (spec
/// §6 "StoreCache: `with_stores(fn) -> T`"). Kept as plain get/insert/
/// remove/scan accessors rather than a closure-taking method so the
/// trait stays object-safe, grounded on the teacher's `StorageBackend` KV
/// contract (`store/backend.rs`) -- [`Client::with_stores`] is the
/// closure-based scoped view spec §4.8 describes; it's built atop this
/// trait, not part of it.
pub trait StoreCache: Send + Sync + 'static {
    fn get(&self, path: &Path) -> Option<Arc<dyn AnyStore>>;
    fn insert(&self, path: Path, store: Arc<dyn AnyStore>);
    fn remove(&self, path: &Path) -> Option<Arc<dyn AnyStore>>;
    /// A point-in-time snapshot, used by enumeration and eviction so
    /// callers never hold the cache's lock while iterating (spec §5
    /// "operations that enumerate stores snapshot the map before
    /// iterating").
    fn snapshot(&self) -> Vec<(Path, Arc<dyn AnyStore>)>;
}

/// The default, in-process cache: a single lock guarding a plain map
/// (spec §5 "the client's store map is guarded by its own lock").
#[derive(Default)]
pub struct InMemoryStoreCache {
    stores: RwLock<HashMap<Path, Arc<dyn AnyStore>>>,
}

impl InMemoryStoreCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreCache for InMemoryStoreCache {
    fn get(&self, path: &Path) -> Option<Arc<dyn AnyStore>> {
        self.stores.read().get(path).cloned()
    }

    fn insert(&self, path: Path, store: Arc<dyn AnyStore>) {
        self.stores.write().insert(path, store);
    }

    fn remove(&self, path: &Path) -> Option<Arc<dyn AnyStore>> {
        self.stores.write().remove(path)
    }

    fn snapshot(&self) -> Vec<(Path, Arc<dyn AnyStore>)> {
        self.stores
            .read()
            .iter()
            .map(|(p, s)| (p.clone(), s.clone()))
            .collect()
    }
}

/// Builds a concrete [`Store`] for a newly-requested path, applying
/// whatever default modifier chain the embedding application wants every
/// store of this kind to carry (spec §6 "StoreCreator").
#[async_trait]
pub trait StoreCreator<S: Reducer>: Send + Sync + 'static {
    async fn create(
        &self,
        operation: Arc<dyn Operation<S::Value, S::Error>>,
        ctx: Context,
        initial_state: S,
    ) -> Arc<Store<S>>;
}

/// The straightforward creator: builds the store with no additional
/// modifiers beyond what the caller's `operation` already carries.
/// Applications wanting the spec's suggested default chain
/// (`retry(3).dedup().enable_automatic_execution(...)` for queries and
/// paginated operations, `retry(3)` for mutations) apply it to the
/// operation before calling `Client::store`, or supply their own
/// `StoreCreator`.
pub struct DirectStoreCreator;

#[async_trait]
impl<S: Reducer> StoreCreator<S> for DirectStoreCreator {
    async fn create(
        &self,
        operation: Arc<dyn Operation<S::Value, S::Error>>,
        ctx: Context,
        initial_state: S,
    ) -> Arc<Store<S>> {
        Store::new(operation, ctx, initial_state).await
    }
}

/// Pushed into the default cache by a [`MemoryPressureSource`] when the
/// host process wants stale, unobserved stores reclaimed.
pub trait MemoryPressureSource: Send + Sync + 'static {
    /// Registers `on_pressure`, invoked every time memory pressure is
    /// signalled. Returns a subscription that stops delivery on cancel.
    fn subscribe(&self, on_pressure: Arc<dyn Fn() + Send + Sync>) -> crate::subscription::Subscription;
}

/// Default-context overrides and the eviction policy toggle (spec's
/// ambient `ClientConfig`).
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Applied to every store's context before the operation's own
    /// `setup` runs.
    pub default_context: Context,
    /// `true` iff zero-subscriber stores are evictable under memory
    /// pressure by default (a store's context can still override this
    /// per-path via an `evictable_pressure` flag the application defines).
    pub evict_under_pressure: bool,
}

/// A weak, `Clone`-able handle back to a [`Client`], carried in every
/// store's context (`ClientBackRefKey`) so operations can reach the
/// client without creating an ownership cycle (client owns stores,
/// stores' contexts would otherwise own the client right back).
#[derive(Clone)]
pub struct ClientHandle {
    inner: Weak<ClientInner>,
}

impl ClientHandle {
    /// Upgrades to a strong [`Client`], if it still exists.
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

struct ClientInner {
    cache: Arc<dyn StoreCache>,
    config: ClientConfig,
    path_types: RwLock<HashMap<Path, &'static str>>,
}

/// Holds a [`StoreCache`], a default [`Context`], and a `Path ->
/// state-type-name` registry that catches a path reused at a different
/// operation type (spec §3 "Client", §3 "Invariants").
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Builds a client over the default in-memory cache.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_cache(Arc::new(InMemoryStoreCache::new()), config)
    }

    /// Builds a client over a caller-supplied cache (e.g. one fronted by
    /// an external memory-pressure-aware store).
    pub fn with_cache(cache: Arc<dyn StoreCache>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                cache,
                config,
                path_types: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// A weak handle suitable for `ClientBackRefKey`.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn context_for_new_store(&self) -> Context {
        self.inner
            .config
            .default_context
            .clone()
            .with::<ClientBackRefKey>(Some(self.handle()))
    }

    /// Returns the store at `operation.path()`, creating it via `creator`
    /// if absent.
    ///
    /// If a store already exists at this path but was registered under a
    /// different state type, the mismatch is logged and a fresh,
    /// non-retained store is returned instead -- the existing entry in
    /// the cache is left untouched (spec §3 "Invariants", §7
    /// "DuplicatePathTypeMismatch").
    pub async fn store<S, C>(
        &self,
        operation: Arc<dyn Operation<S::Value, S::Error>>,
        initial_state: S,
        creator: &C,
    ) -> Arc<Store<S>>
    where
        S: Reducer,
        C: StoreCreator<S>,
    {
        let path = operation.path();
        let expected = std::any::type_name::<S>();

        if let Some(existing) = self.inner.cache.get(&path) {
            let recorded = *self
                .inner
                .path_types
                .read()
                .get(&path)
                .unwrap_or(&expected);
            match existing.as_any_arc().downcast::<Store<S>>() {
                Ok(typed) if recorded == expected => return typed,
                _ => {
                    warn!(
                        path = %path,
                        expected = recorded,
                        found = expected,
                        "duplicate path registered at a different store type; returning a transient store"
                    );
                    let ctx = self.context_for_new_store();
                    return creator.create(operation, ctx, initial_state).await;
                }
            }
        }

        let ctx = self.context_for_new_store();
        let store = creator.create(operation, ctx, initial_state).await;
        self.inner.path_types.write().insert(path.clone(), expected);
        self.inner.cache.insert(path, store.clone());
        store
    }

    /// Every store whose path `matching` is a prefix of (spec's
    /// `stores(matching:)`).
    pub fn stores(&self, matching: &Path) -> Vec<Arc<dyn AnyStore>> {
        self.inner
            .cache
            .snapshot()
            .into_iter()
            .filter(|(p, _)| matching.is_prefix_of(p))
            .map(|(_, s)| s)
            .collect()
    }

    /// As [`Client::stores`], additionally filtered to stores whose
    /// recorded state type name matches `S` exactly.
    pub fn stores_of<S: Reducer>(&self, matching: &Path) -> Vec<Arc<dyn AnyStore>> {
        let expected = std::any::type_name::<S>();
        self.stores(matching)
            .into_iter()
            .filter(|s| s.state_type_name() == expected)
            .collect()
    }

    /// Removes every store whose path `matching` is a prefix of.
    pub fn clear_stores(&self, matching: &Path) {
        for (path, _) in self.inner.cache.snapshot() {
            if matching.is_prefix_of(&path) {
                self.inner.cache.remove(&path);
                self.inner.path_types.write().remove(&path);
            }
        }
    }

    /// Removes the single store at `path`, if any.
    pub fn clear_store(&self, path: &Path) {
        self.inner.cache.remove(path);
        self.inner.path_types.write().remove(path);
    }

    /// Evicts every store with zero subscribers (spec §4.8 "Eviction",
    /// §5 "eviction never cancels active tasks for stores with live
    /// observers" -- a zero-subscriber store may still have a
    /// subscription-independent explicit run in flight, which this does
    /// not touch, only the cache entry).
    pub fn evict_unobserved(&self) {
        if !self.inner.config.evict_under_pressure {
            return;
        }
        let mut evicted = 0u32;
        for (path, store) in self.inner.cache.snapshot() {
            if store.subscriber_count() == 0 {
                self.inner.cache.remove(&path);
                self.inner.path_types.write().remove(&path);
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(count = evicted, "evicted unobserved stores under pressure");
        }
    }

    /// Wires `source` to call [`Client::evict_unobserved`] on every
    /// pressure signal, for the lifetime of the returned subscription.
    pub fn evict_on_pressure(&self, source: &dyn MemoryPressureSource) -> crate::subscription::Subscription {
        let client = self.clone();
        source.subscribe(Arc::new(move || client.evict_unobserved()))
    }

    /// A scoped view over `matching`'s stores, supporting additions and
    /// removals from within `perform` (spec §4.8 "two `with_stores`
    /// variants"). Additions made through [`StoreScope::create_store`]
    /// apply the same creator (and so the same default modifiers) as
    /// [`Client::store`].
    pub fn with_stores<T>(&self, matching: &Path, perform: impl FnOnce(&StoreScope<'_>) -> T) -> T {
        let scope = StoreScope {
            client: self,
            matching: matching.clone(),
        };
        perform(&scope)
    }

    /// As [`Client::with_stores`], for a `perform` that itself needs to
    /// `.await` (the spec's second `with_stores` variant -- e.g. an
    /// addition whose `StoreCreator::create` does async work).
    pub async fn with_stores_async<T, F, Fut>(&self, matching: &Path, perform: F) -> T
    where
        F: FnOnce(StoreScope<'_>) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let scope = StoreScope {
            client: self,
            matching: matching.clone(),
        };
        perform(scope).await
    }
}

/// The scoped view handed to a [`Client::with_stores`]/
/// [`Client::with_stores_async`] closure: read/remove accessors
/// pre-filtered to the call's `matching` path, plus a `CreateStore`
/// factory so additions go through the client's usual creator (spec §4.8
/// "Additions require the caller to invoke a `CreateStore` factory
/// exposed during the scope so the same default modifiers are applied").
pub struct StoreScope<'a> {
    client: &'a Client,
    matching: Path,
}

impl<'a> StoreScope<'a> {
    /// Every store under this scope's `matching` path.
    pub fn stores(&self) -> Vec<Arc<dyn AnyStore>> {
        self.client.stores(&self.matching)
    }

    /// As [`Self::stores`], filtered to a specific reducer type.
    pub fn stores_of<S: Reducer>(&self) -> Vec<Arc<dyn AnyStore>> {
        self.client.stores_of::<S>(&self.matching)
    }

    /// Removes every store under this scope's `matching` path.
    pub fn clear_stores(&self) {
        self.client.clear_stores(&self.matching)
    }

    /// Removes a single store, which need not be under `matching`.
    pub fn clear_store(&self, path: &Path) {
        self.client.clear_store(path)
    }

    /// The `CreateStore` factory: builds (or reuses) a store the same
    /// way [`Client::store`] would, so additions inside the scope carry
    /// the client's default modifier chain.
    pub async fn create_store<S, C>(
        &self,
        operation: Arc<dyn Operation<S::Value, S::Error>>,
        initial_state: S,
        creator: &C,
    ) -> Arc<Store<S>>
    where
        S: Reducer,
        C: StoreCreator<S>,
    {
        self.client.store(operation, initial_state, creator).await
    }
}

/// A store lookup failure distinct from an operation's own error type,
/// surfaced when `op.path()`'s type is already claimed (spec §7
/// "DuplicatePathTypeMismatch").
pub fn duplicate_path_type_error<E>(path: Path, expected: &'static str, found: &'static str) -> CoreError<E> {
    CoreError::DuplicatePathType {
        path,
        expected,
        found,
    }
}
