//! Cache facade: owns the lifespan manager and the named index collection.
//!
//! All insertion funnels through [`CacheCore::try_add`], the
//! canonicalization point: concurrent inserts of values sharing a derived
//! key produce exactly one live entry, without a global lock on the read
//! path.

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::CacheError;
use crate::index::{CacheIndex, ItemFactory, ManagedIndex};
use crate::lifespan::{CacheEntry, LifespanManager};
use crate::stats::{CacheCounters, CacheStatsSnapshot};

/// Shared state behind a [`FluidCache`] handle.
pub(crate) struct CacheCore<V> {
    manager: LifespanManager<V>,
    counters: Arc<CacheCounters>,
    indexes: RwLock<Vec<Arc<dyn ManagedIndex<V>>>>,
    /// Serializes the commit step of `try_add`.
    add_lock: Mutex<()>,
}

impl<V> CacheCore<V>
where
    V: Send + Sync + 'static,
{
    pub(crate) fn manager(&self) -> &LifespanManager<V> {
        &self.manager
    }

    pub(crate) fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Inserts `value` or yields the incumbent entry for its derived keys.
    /// Returns the canonical entry and whether this call created it.
    ///
    /// A lone caller either creates exactly one live entry or gets the
    /// incumbent back; concurrent inserters of the same key resolve to a
    /// single winner.
    pub(crate) fn try_add(&self, value: Arc<V>) -> (Arc<CacheEntry<V>>, bool) {
        let indexes: Vec<_> = self.indexes.read().clone();

        // Identity short-circuit: this exact object is already cached.
        for index in &indexes {
            if let Some(existing) = index.find_entry(&value) {
                let same = existing
                    .value()
                    .map_or(false, |held| Arc::ptr_eq(&held, &value));
                if same {
                    return (existing, false);
                }
            }
        }

        let candidate = self.manager.add(Arc::clone(&value));
        let mut duplicate = false;
        for index in &indexes {
            if !index.add_entry(&candidate) {
                duplicate = true;
            }
        }

        let _guard = self.add_lock.lock();
        if !duplicate {
            candidate.touch(&self.manager);
            self.counters.inc_miss();
            return (candidate, true);
        }
        // Lost to an incumbent on at least one key; hand back the winner.
        for index in &indexes {
            if let Some(existing) = index.find_entry(&value) {
                if !Arc::ptr_eq(&existing, &candidate) {
                    return (existing, false);
                }
            }
        }
        (candidate, false)
    }
}

/// In-process cache of live objects with soft LRU semantics: entries younger
/// than `min_age` are never evicted, entries older than `max_age` always
/// are, and capacity is enforced approximately in between. Lookups go
/// through named secondary indexes, each keyed by a different derived key.
///
/// Handles are cheap to clone and share one cache.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use fluidcache::builder::FluidCacheBuilder;
///
/// struct User { id: u64, name: String }
///
/// let cache = FluidCacheBuilder::new(100, Duration::from_secs(1), Duration::from_secs(60))
///     .try_build::<User>()
///     .unwrap();
/// cache.add_index("by_id", |user: &User| user.id);
/// cache.add_index("by_name", |user: &User| user.name.clone());
///
/// cache.add(Arc::new(User { id: 1, name: "ada".into() })).unwrap();
/// cache.add(Arc::new(User { id: 2, name: "grace".into() })).unwrap();
///
/// let stats = cache.stats();
/// assert_eq!(stats.current, 2);
/// assert_eq!(stats.since_creation, 2);
/// ```
pub struct FluidCache<V> {
    core: Arc<CacheCore<V>>,
}

impl<V> Clone for FluidCache<V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V> FluidCache<V>
where
    V: Send + Sync + 'static,
{
    pub(crate) fn from_parts(manager: LifespanManager<V>, counters: Arc<CacheCounters>) -> Self {
        Self {
            core: Arc::new(CacheCore {
                manager,
                counters,
                indexes: RwLock::new(Vec::new()),
                add_lock: Mutex::new(()),
            }),
        }
    }

    /// Creates and registers an index under `name`. Indexes should be added
    /// before the cache is populated; one added later stays empty until the
    /// next rebuild. A same-named index is replaced.
    pub fn add_index<K>(
        &self,
        name: &str,
        key_of: impl Fn(&V) -> K + Send + Sync + 'static,
    ) -> Arc<CacheIndex<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        self.register(CacheIndex::new(
            name.to_string(),
            Arc::downgrade(&self.core),
            Arc::new(key_of),
            None,
        ))
    }

    /// Like [`add_index`](Self::add_index), with a default factory invoked
    /// on every miss of this index.
    pub fn add_index_with_loader<K>(
        &self,
        name: &str,
        key_of: impl Fn(&V) -> K + Send + Sync + 'static,
        loader: ItemFactory<K, V>,
    ) -> Arc<CacheIndex<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        self.register(CacheIndex::new(
            name.to_string(),
            Arc::downgrade(&self.core),
            Arc::new(key_of),
            Some(loader),
        ))
    }

    fn register<K>(&self, index: CacheIndex<K, V>) -> Arc<CacheIndex<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let index = Arc::new(index);
        let erased: Arc<dyn ManagedIndex<V>> = index.clone() as Arc<dyn ManagedIndex<V>>;
        let mut indexes = self.core.indexes.write();
        indexes.retain(|existing| existing.name() != index.name());
        indexes.push(Arc::clone(&erased));
        self.core.manager.register_index(Arc::downgrade(&erased));
        index
    }

    /// Looks up an index by name and key type. A name match with a
    /// different key type returns `None`.
    pub fn index<K>(&self, name: &str) -> Option<Arc<CacheIndex<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let found = self
            .core
            .indexes
            .read()
            .iter()
            .find(|index| index.name() == name)
            .cloned()?;
        found.as_any().downcast::<CacheIndex<K, V>>().ok()
    }

    /// Convenience lookup through the named index. An unknown index name
    /// resolves to `Ok(None)`.
    pub async fn get<K>(&self, index_name: &str, key: &K) -> Result<Option<Arc<V>>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        match self.index::<K>(index_name) {
            Some(index) => index.get(key).await,
            None => Ok(None),
        }
    }

    /// Convenience lookup with a per-call factory.
    pub async fn get_with<K, F, Fut>(
        &self,
        index_name: &str,
        key: &K,
        factory: F,
    ) -> Result<Option<Arc<V>>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        F: FnOnce(&K) -> Option<Fut> + Send,
        Fut: std::future::Future<Output = Result<Option<Arc<V>>, CacheError>> + Send + 'static,
    {
        match self.index::<K>(index_name) {
            Some(index) => index.get_with(key, factory).await,
            None => Ok(None),
        }
    }

    /// Inserts `value`, deduplicating against every index. The canonical
    /// entry is not exposed; retrieve through an index instead.
    pub fn add(&self, value: Arc<V>) -> Result<(), CacheError> {
        let _ = self.core.try_add(value);
        self.core.manager.check_validity()
    }

    /// Drops every index reference, then clears the lifespan manager.
    pub fn clear(&self) {
        for index in self.core.indexes.read().iter() {
            index.clear();
        }
        self.core.manager.clear();
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.core.manager.stats_snapshot()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<CacheCore<V>> {
        &self.core
    }
}

impl<V> std::fmt::Debug for FluidCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluidCache")
            .field("indexes", &self.core.indexes.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FluidCacheBuilder;
    use crate::clock::ManualClock;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct User {
        id: u64,
        name: String,
    }

    fn user(id: u64, name: &str) -> Arc<User> {
        Arc::new(User {
            id,
            name: name.to_string(),
        })
    }

    fn cache() -> FluidCache<User> {
        FluidCacheBuilder::new(100, Duration::from_secs(5), Duration::from_secs(60))
            .clock(Arc::new(ManualClock::new()))
            .try_build::<User>()
            .unwrap()
    }

    #[test]
    fn add_registers_in_every_index() {
        let cache = cache();
        let by_id = cache.add_index("by_id", |u: &User| u.id);
        let by_name = cache.add_index("by_name", |u: &User| u.name.clone());

        cache.add(user(1, "ada")).unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_name.len(), 1);
        assert_eq!(cache.stats().current, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn readding_the_same_object_is_a_noop() {
        let cache = cache();
        cache.add_index("by_id", |u: &User| u.id);

        let ada = user(1, "ada");
        cache.add(Arc::clone(&ada)).unwrap();
        cache.add(Arc::clone(&ada)).unwrap();
        cache.add(ada).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.current, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.since_creation, 1);
    }

    #[test]
    fn a_live_incumbent_wins_over_a_new_object_with_the_same_key() {
        let cache = cache();
        let by_id = cache.add_index("by_id", |u: &User| u.id);

        let first = user(1, "ada");
        cache.add(Arc::clone(&first)).unwrap();
        cache.add(user(1, "imposter")).unwrap();

        assert_eq!(cache.stats().current, 1);
        let entry = by_id.find_entry(&first).unwrap();
        assert!(Arc::ptr_eq(&entry.value().unwrap(), &first));
    }

    #[test]
    fn try_add_reports_creation_exactly_once() {
        let cache = cache();
        cache.add_index("by_id", |u: &User| u.id);

        let ada = user(1, "ada");
        let (_, created) = cache.core().try_add(Arc::clone(&ada));
        assert!(created);
        let (_, created) = cache.core().try_add(ada);
        assert!(!created);
    }

    #[test]
    fn index_lookup_respects_name_and_key_type() {
        let cache = cache();
        cache.add_index("by_id", |u: &User| u.id);

        assert!(cache.index::<u64>("by_id").is_some());
        assert!(cache.index::<String>("by_id").is_none());
        assert!(cache.index::<u64>("unknown").is_none());
    }

    #[test]
    fn same_named_index_is_replaced() {
        let cache = cache();
        cache.add_index("by_id", |u: &User| u.id);
        cache.add_index("by_id", |u: &User| u.id + 1);
        assert_eq!(cache.core().indexes.read().len(), 1);
    }

    #[test]
    fn clear_empties_indexes_and_counters() {
        let cache = cache();
        let by_id = cache.add_index("by_id", |u: &User| u.id);
        cache.add(user(1, "ada")).unwrap();
        cache.add(user(2, "grace")).unwrap();

        cache.clear();
        assert_eq!(by_id.len(), 0);
        let stats = cache.stats();
        assert_eq!(stats.current, 0);
        assert_eq!(stats.since_creation, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn remove_through_an_index_evicts_for_all() {
        let cache = cache();
        let by_id = cache.add_index("by_id", |u: &User| u.id);
        let by_name = cache.add_index("by_name", |u: &User| u.name.clone());

        let ada = user(1, "ada");
        cache.add(Arc::clone(&ada)).unwrap();
        by_id.remove(&1);

        assert_eq!(cache.stats().current, 0);
        // The other index still holds a reference, but it is dead.
        let entry = by_name.find_entry(&ada).unwrap();
        assert!(!entry.is_live());
    }

    #[test]
    fn rebuild_repopulates_a_late_index() {
        let cache = cache();
        cache.add_index("by_id", |u: &User| u.id);
        cache.add(user(1, "ada")).unwrap();
        cache.add(user(2, "grace")).unwrap();

        let late = cache.add_index("by_name", |u: &User| u.name.clone());
        assert_eq!(late.len(), 0);

        let size = late.rebuild_from(cache.core().manager());
        assert_eq!(size, 2);
        assert_eq!(cache.stats().current, 2);
    }

    #[test]
    fn dead_references_are_reclaimed_by_add() {
        let cache = cache();
        let by_id = cache.add_index("by_id", |u: &User| u.id);

        let first = user(1, "ada");
        cache.add(Arc::clone(&first)).unwrap();
        by_id.remove(&1);

        // The slot is free again: a new object under the same key goes in.
        let second = user(1, "ada2");
        cache.add(Arc::clone(&second)).unwrap();
        let entry = by_id.find_entry(&second).unwrap();
        assert!(Arc::ptr_eq(&entry.value().unwrap(), &second));
        assert_eq!(cache.stats().current, 1);
    }
}
