//! Cache entry: one value, its bag attribution, and an intrusive chain link.
//!
//! An entry's `bag` field holds the *number* of the bag currently claiming
//! it (not a pointer), which keeps entries and bags from referencing each
//! other cyclically. Touching an entry is attribution-only: a CAS on the bag
//! number. The entry stays physically linked in whatever chain it was in;
//! cleanup relocates it the next time that chain is visited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::lifespan::LifespanManager;
use crate::stats::CacheCounters;

/// Bag-number sentinel for an entry not attributed to any bag.
pub(crate) const NO_BAG: u64 = u64::MAX;

/// Fields guarded by the entry lock.
pub(crate) struct EntryState<V> {
    /// The cached value, or `None` once the entry has been evicted. An
    /// evicted entry may still be referenced by index maps; resolving it
    /// is treated as a miss.
    pub(crate) value: Option<Arc<V>>,
    /// Next entry in the owning chain. Only meaningful while linked.
    pub(crate) next: Option<Arc<CacheEntry<V>>>,
}

/// Handle wrapping one cached value and its current bag attribution.
///
/// Entries are owned by bag chains; indexes hold `Weak` references only.
pub struct CacheEntry<V> {
    /// Number of the bag claiming this entry, or [`NO_BAG`].
    pub(crate) bag: AtomicU64,
    pub(crate) state: Mutex<EntryState<V>>,
}

impl<V> CacheEntry<V>
where
    V: Send + Sync + 'static,
{
    /// Creates an unattributed entry. Linking into the ring happens on the
    /// first touch, through the manager.
    pub(crate) fn new(value: Arc<V>) -> Arc<Self> {
        Arc::new(Self {
            bag: AtomicU64::new(NO_BAG),
            state: Mutex::new(EntryState {
                value: Some(value),
                next: None,
            }),
        })
    }

    /// Returns the cached value, if the entry is still live.
    pub fn value(&self) -> Option<Arc<V>> {
        self.state.lock().value.clone()
    }

    /// Whether the entry still carries a value.
    pub fn is_live(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Number of the bag currently claiming this entry, or [`NO_BAG`].
    pub(crate) fn bag_number(&self) -> u64 {
        self.bag.load(Ordering::Acquire)
    }

    /// Reattributes the entry to the manager's current bag.
    ///
    /// Fast path is a single CAS on the bag number; no chain is walked and
    /// no manager lock is taken. An unattributed entry (fresh, or expelled
    /// by `clear`) registers through the manager instead, which links it
    /// into the current bag's chain under the manager lock.
    pub(crate) fn touch(self: &Arc<Self>, manager: &LifespanManager<V>) {
        loop {
            let current = manager.current_bag_number();
            let claimed = self.bag.load(Ordering::Acquire);
            if claimed == current {
                return;
            }
            if claimed == NO_BAG {
                manager.add_to_head(self);
                return;
            }
            // Hold the entry lock across the CAS so eviction cannot clear
            // the value while we re-attribute.
            let state = self.state.lock();
            if state.value.is_none() {
                return;
            }
            if self
                .bag
                .compare_exchange(claimed, current, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                drop(state);
                manager.note_item_in_current_bag();
                return;
            }
            // Lost the race against another touch or a cleanup pass; retry.
        }
    }

    /// Evicts the entry: clears value, bag attribution, and chain link, and
    /// decrements the live count. Idempotent.
    pub(crate) fn remove_from_cache(&self, counters: &CacheCounters) {
        let mut state = self.state.lock();
        if self.bag.load(Ordering::Acquire) != NO_BAG && state.value.is_some() {
            state.value = None;
            state.next = None;
            self.bag.store(NO_BAG, Ordering::Release);
            counters.dec_current();
        }
    }
}

impl<V> std::fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bag = self.bag.load(Ordering::Relaxed);
        f.debug_struct("CacheEntry")
            .field("bag", &if bag == NO_BAG { None } else { Some(bag) })
            .finish_non_exhaustive()
    }
}
