//! Secondary indexes: derived key → non-owning entry reference.
//!
//! An index never keeps an entry alive; it holds `Weak` references that the
//! lifespan manager invalidates by dropping chains and clearing values.
//! Misses with a factory go through an in-flight table of shared futures so
//! that any number of concurrent lookups of the same key run the factory at
//! most once and all observe the same canonical result.
//!
//! ```text
//!   get(k) ── live? ──> touch, return value
//!      │
//!      └─ miss ──> pending[k]? ──> await the shared load
//!                     │
//!                     └─ none ──> factory(k) -> future
//!                                 insert Shared, await, canonicalize
//! ```

use std::any::Any;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::cache::CacheCore;
use crate::error::CacheError;
use crate::lifespan::{CacheEntry, LifespanManager};

/// Deferred computation produced by a factory: the loaded value, `None` for
/// a definitive absence, or a propagated factory failure.
pub type FactoryFuture<V> = BoxFuture<'static, Result<Option<Arc<V>>, CacheError>>;

/// Type-erased default factory stored on an index. Returning `None` instead
/// of a future is a programming error surfaced as
/// [`CacheError::InvalidFactory`].
pub type ItemFactory<K, V> = Arc<dyn Fn(&K) -> Option<FactoryFuture<V>> + Send + Sync>;

type SharedLoad<V> = Shared<FactoryFuture<V>>;

/// One in-flight load. The token lets any awaiter retire exactly this load
/// from the pending table once it resolves.
struct PendingLoad<V> {
    token: u64,
    load: SharedLoad<V>,
}

impl<V> Clone for PendingLoad<V> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            load: self.load.clone(),
        }
    }
}

/// Type-erased index surface used by the facade and the lifespan manager.
pub(crate) trait ManagedIndex<V>: Send + Sync {
    fn name(&self) -> &str;
    /// Registers a non-owning reference under the entry's derived key.
    /// `false` means a live incumbent already holds the key.
    fn add_entry(&self, entry: &Arc<CacheEntry<V>>) -> bool;
    /// Looks up the entry currently registered under the value's derived key.
    fn find_entry(&self, value: &V) -> Option<Arc<CacheEntry<V>>>;
    fn clear(&self);
    /// Discards the map and repopulates from the manager's live iteration.
    fn rebuild_from(&self, manager: &LifespanManager<V>) -> usize;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A mapping from a derived key to a non-owning entry reference, with an
/// optional asynchronous factory for lazy loading on miss.
pub struct CacheIndex<K, V> {
    name: String,
    core: Weak<CacheCore<V>>,
    key_of: Arc<dyn Fn(&V) -> K + Send + Sync>,
    loader: Option<ItemFactory<K, V>>,
    map: Mutex<FxHashMap<K, Weak<CacheEntry<V>>>>,
    pending: Mutex<FxHashMap<K, PendingLoad<V>>>,
    next_token: AtomicU64,
}

impl<K, V> CacheIndex<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        name: String,
        core: Weak<CacheCore<V>>,
        key_of: Arc<dyn Fn(&V) -> K + Send + Sync>,
        loader: Option<ItemFactory<K, V>>,
    ) -> Self {
        Self {
            name,
            core,
            key_of,
            loader,
            map: Mutex::new(FxHashMap::default()),
            pending: Mutex::new(FxHashMap::default()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Index name as registered with the cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value bound to `key`, lazily loading it through the
    /// index's default factory on a miss (plain miss if none is configured).
    pub async fn get(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
        match self.loader.clone() {
            Some(loader) => self.get_impl(key, Some(Box::new(move |k: &K| loader(k)))).await,
            None => self.get_impl(key, None).await,
        }
    }

    /// Returns the value bound to `key`, using `factory` for this call on a
    /// miss. Concurrent callers of the same key share one factory run.
    pub async fn get_with<F, Fut>(&self, key: &K, factory: F) -> Result<Option<Arc<V>>, CacheError>
    where
        F: FnOnce(&K) -> Option<Fut> + Send,
        Fut: Future<Output = Result<Option<Arc<V>>, CacheError>> + Send + 'static,
    {
        self.get_impl(
            key,
            Some(Box::new(move |k: &K| factory(k).map(|fut| fut.boxed()))),
        )
        .await
    }

    async fn get_impl(
        &self,
        key: &K,
        factory: Option<Box<dyn FnOnce(&K) -> Option<FactoryFuture<V>> + Send + '_>>,
    ) -> Result<Option<Arc<V>>, CacheError> {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return Ok(None),
        };
        core.manager().check_validity()?;

        if let Some(value) = self.find_live(key, &core) {
            core.counters().inc_hit();
            return Ok(Some(value));
        }

        let factory = match factory {
            Some(factory) => factory,
            None => {
                core.counters().inc_miss();
                return Ok(None);
            }
        };

        // Join an in-flight load for this key or start one. The factory is
        // invoked under the pending lock so racing callers observe exactly
        // one invocation; only future *construction* happens under the lock.
        let (pending, created) = {
            let mut table = self.pending.lock();
            match table.entry(key.clone()) {
                std::collections::hash_map::Entry::Occupied(slot) => (slot.get().clone(), false),
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let user_future = match factory(key) {
                        Some(fut) => fut,
                        None => return Err(CacheError::InvalidFactory),
                    };
                    let load = PendingLoad {
                        token: self.next_token.fetch_add(1, Ordering::Relaxed),
                        load: drive_load(Arc::clone(&core), user_future).shared(),
                    };
                    slot.insert(load.clone());
                    (load, true)
                }
            }
        };

        let result = pending.load.clone().await;

        // Whoever gets here first retires this load from the table.
        {
            let mut table = self.pending.lock();
            if table
                .get(key)
                .map_or(false, |slot| slot.token == pending.token)
            {
                table.remove(key);
            }
        }

        if !created {
            match &result {
                Ok(Some(_)) => core.counters().inc_hit(),
                Ok(None) => core.counters().inc_miss(),
                Err(_) => {}
            }
        }
        result
    }

    /// Evicts the entry bound to `key`, if any.
    pub fn remove(&self, key: &K) {
        let entry = { self.map.lock().remove(key) }.and_then(|weak| weak.upgrade());
        if let (Some(entry), Some(core)) = (entry, self.core.upgrade()) {
            entry.remove_from_cache(core.counters());
            let _ = core.manager().check_validity();
        }
    }

    /// Number of keys currently registered, live or not.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    fn find_live(&self, key: &K, core: &Arc<CacheCore<V>>) -> Option<Arc<V>> {
        let entry = { self.map.lock().get(key).and_then(Weak::upgrade) }?;
        let value = entry.value()?;
        entry.touch(core.manager());
        Some(value)
    }
}

impl<K, V> ManagedIndex<V> for CacheIndex<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn add_entry(&self, entry: &Arc<CacheEntry<V>>) -> bool {
        let value = match entry.value() {
            Some(value) => value,
            None => return false,
        };
        let key = (self.key_of)(&value);
        let mut map = self.map.lock();
        match map.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(existing) if existing.is_live() && !Arc::ptr_eq(&existing, entry) => false,
                _ => {
                    slot.insert(Arc::downgrade(entry));
                    true
                }
            },
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(Arc::downgrade(entry));
                true
            }
        }
    }

    fn find_entry(&self, value: &V) -> Option<Arc<CacheEntry<V>>> {
        let key = (self.key_of)(value);
        self.map.lock().get(&key).and_then(Weak::upgrade)
    }

    fn clear(&self) {
        self.map.lock().clear();
        self.pending.lock().clear();
    }

    fn rebuild_from(&self, manager: &LifespanManager<V>) -> usize {
        let mut map = self.map.lock();
        map.clear();
        // Newest-to-oldest iteration, so the first writer per key wins.
        for entry in manager.live_entries() {
            if let Some(value) = entry.value() {
                map.entry((self.key_of)(&value))
                    .or_insert_with(|| Arc::downgrade(&entry));
            }
        }
        map.len()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Awaits the user future with no lock held, then routes a produced value
/// through the facade's canonicalization so concurrent inserts of the same
/// key converge on one entry. Every awaiter receives the winner's value.
fn drive_load<V>(core: Arc<CacheCore<V>>, user: FactoryFuture<V>) -> FactoryFuture<V>
where
    V: Send + Sync + 'static,
{
    Box::pin(async move {
        match user.await? {
            None => {
                core.counters().inc_miss();
                Ok(None)
            }
            Some(value) => {
                let (entry, created) = core.try_add(value);
                if !created {
                    core.counters().inc_hit();
                }
                core.manager().check_validity()?;
                Ok(entry.value())
            }
        }
    })
}

impl<K, V> std::fmt::Debug for CacheIndex<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheIndex")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
