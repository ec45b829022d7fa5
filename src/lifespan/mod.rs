//! Lifespan manager: time-sliced approximate-LRU eviction.
//!
//! The manager owns a fixed ring of [`bag::AgeBag`]s. Admissions link into
//! the current bag; touches merely re-stamp an entry's bag *number*.
//! Cleanup periodically closes the current bag, retires bags that are
//! over-age or over-capacity, relocates entries that were touched after
//! their chain's bag closed, and advances the ring.
//!
//! ## Architecture
//!
//! ```text
//!              oldest                         current
//!                v                               v
//!   ring:  ... [b41] [b42] [b43] [b44] [b45] [b46] ...
//!                |                         |
//!              chain                     chain <- add_to_head (manager lock)
//!                |
//!           clean_bag: claimed == 41 -> evict
//!                      claimed  > 41 -> splice into claiming bag's chain
//! ```
//!
//! ## Cleanup triggers
//!
//! Cleanup is opportunistic: any touching or mutating operation calls
//! [`LifespanManager::check_validity`], which returns immediately unless the
//! current bag is over its admission limit or the periodic deadline passed,
//! and silently skips if another thread already holds the manager lock.

pub(crate) mod bag;
pub(crate) mod entry;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::CacheError;
use crate::index::ManagedIndex;
use crate::stats::{CacheCounters, CacheStatsSnapshot};
use bag::BagRing;
pub use entry::CacheEntry;
use entry::NO_BAG;

/// Admission target per bag; also the divisor for the per-bag item limit.
pub(crate) const PREFERRED_BAGS: usize = 20;
/// Slots kept empty ahead of the current bag so the ring never laps itself.
pub(crate) const EMPTY_BUFFER: u64 = 5;
/// Bag number past which the whole cache is reset rather than risk the ring
/// wrapping ambiguously.
pub(crate) const AGED_OUT_LIMIT: u64 = 1_000_000;
/// Hard ceiling on the configured maximum retention age.
pub(crate) const MAX_AGE_CAP: Duration = Duration::from_secs(12 * 60 * 60);
/// Hard ceiling on the periodic cleanup interval.
pub(crate) const CHECK_INTERVAL_CAP: Duration = Duration::from_secs(3 * 60);

/// Predicate consulted during cleanup; `false` forces a full clear.
pub(crate) type ValidateFn = Box<dyn Fn() -> bool + Send + Sync>;

/// Retention parameters, pre-resolved to milliseconds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetentionPolicy {
    pub(crate) capacity: usize,
    pub(crate) min_age_ms: u64,
    pub(crate) max_age_ms: u64,
    pub(crate) check_interval_ms: u64,
    pub(crate) bag_item_limit: usize,
}

/// Ring positions guarded by the manager lock.
struct RingState {
    current: u64,
    oldest: u64,
}

/// Owns the bag ring and drives admission, cleanup, and index rebuilds.
pub struct LifespanManager<V> {
    /// THE manager mutex. Guards ring advancement, cleanup, and clear.
    ring: Mutex<RingState>,
    bags: BagRing<V>,
    /// Lock-free mirrors of the ring positions for touches and stats.
    current_bag: AtomicU64,
    oldest_bag: AtomicU64,
    /// Fresh admissions into the current bag since it opened.
    items_in_current_bag: AtomicUsize,
    /// Deadline (ms since epoch) after which cleanup runs regardless of load.
    next_validity_check: AtomicU64,
    counters: Arc<CacheCounters>,
    clock: Arc<dyn Clock>,
    epoch: Instant,
    validate: Option<ValidateFn>,
    policy: RetentionPolicy,
    /// Indexes to rebuild or clear from within cleanup.
    indexes: RwLock<Vec<Weak<dyn ManagedIndex<V>>>>,
}

impl<V> LifespanManager<V>
where
    V: Send + Sync + 'static,
{
    pub(crate) fn new(
        policy: RetentionPolicy,
        ring_len: usize,
        clock: Arc<dyn Clock>,
        validate: Option<ValidateFn>,
        counters: Arc<CacheCounters>,
    ) -> Self {
        let epoch = clock.now();
        let manager = Self {
            ring: Mutex::new(RingState {
                current: 0,
                oldest: 0,
            }),
            bags: BagRing::new(ring_len),
            current_bag: AtomicU64::new(0),
            oldest_bag: AtomicU64::new(0),
            items_in_current_bag: AtomicUsize::new(0),
            next_validity_check: AtomicU64::new(policy.check_interval_ms),
            counters,
            clock,
            epoch,
            validate,
            policy,
            indexes: RwLock::new(Vec::new()),
        };
        manager.bags.bag(0).reopen(0);
        manager
    }

    /// Milliseconds elapsed since construction, per the configured clock.
    fn now_ms(&self) -> u64 {
        self.clock.now().duration_since(self.epoch).as_millis() as u64
    }

    pub(crate) fn current_bag_number(&self) -> u64 {
        self.current_bag.load(Ordering::Acquire)
    }

    pub(crate) fn note_item_in_current_bag(&self) {
        self.items_in_current_bag.fetch_add(1, Ordering::Relaxed);
    }

    /// Registers an index for rebuild and clear during cleanup. An index
    /// re-registered under the same name supersedes the old registration.
    pub(crate) fn register_index(&self, index: Weak<dyn ManagedIndex<V>>) {
        let name = match index.upgrade() {
            Some(strong) => strong.name().to_string(),
            None => return,
        };
        let mut indexes = self.indexes.write();
        indexes.retain(|weak| {
            weak.upgrade()
                .map_or(false, |existing| existing.name() != name)
        });
        indexes.push(index);
    }

    /// Creates an entry owned logically by this manager. The entry is not
    /// linked into any bag yet; linking happens on its first touch.
    pub(crate) fn add(&self, value: Arc<V>) -> Arc<CacheEntry<V>> {
        CacheEntry::new(value)
    }

    /// Links an unattributed entry at the head of the current bag's chain
    /// and bumps the admission counters. No-op if the entry was evicted or
    /// already registered by a racing touch.
    pub(crate) fn add_to_head(&self, entry: &Arc<CacheEntry<V>>) {
        let ring = self.ring.lock();
        let mut state = entry.state.lock();
        if state.value.is_none() || entry.bag_number() != NO_BAG {
            return;
        }
        let bag = self.bags.bag(ring.current);
        let mut head = bag.head.lock();
        state.next = head.take();
        *head = Some(Arc::clone(entry));
        entry.bag.store(ring.current, Ordering::Release);
        drop(head);
        drop(state);
        drop(ring);

        self.items_in_current_bag.fetch_add(1, Ordering::Relaxed);
        self.counters.inc_current();
        self.counters.inc_total();
    }

    /// Opportunistic cleanup. Cheap no-op unless the current bag is over
    /// its admission limit or the periodic deadline passed; silently skips
    /// when another thread is already cleaning.
    pub(crate) fn check_validity(&self) -> Result<(), CacheError> {
        let now = self.now_ms();
        if self.items_in_current_bag.load(Ordering::Relaxed) <= self.policy.bag_item_limit
            && now < self.next_validity_check.load(Ordering::Relaxed)
        {
            return Ok(());
        }
        let mut ring = match self.ring.try_lock() {
            Some(guard) => guard,
            None => return Ok(()),
        };
        self.cleanup(&mut ring, now)
    }

    /// Closes the current bag, retires eligible bags from the oldest end,
    /// opens the next bag, and rebuilds indexes when dead references have
    /// accumulated past capacity.
    fn cleanup(&self, ring: &mut RingState, now: u64) -> Result<(), CacheError> {
        if let Some(validate) = &self.validate {
            if !validate() {
                debug!("validation predicate failed, clearing cache");
                self.clear_all(ring, now);
                return Ok(());
            }
        }
        if ring.current > AGED_OUT_LIMIT {
            warn!(current_bag = ring.current, "bag numbers aged out, clearing cache");
            self.clear_all(ring, now);
            return Ok(());
        }

        let before = self.counters.current();
        let capacity = self.policy.capacity;
        let ring_len = self.bags.len() as u64;
        let mut above = before as i64 - capacity as i64;
        let mut b = ring.oldest;
        while b != ring.current {
            let near_end = ring.current - b > ring_len.saturating_sub(EMPTY_BUFFER);
            let stop = self.bags.bag(b).stop_time();
            let expired = stop.map_or(false, |s| s + self.policy.max_age_ms < now);
            let over_capacity =
                above > 0 && stop.map_or(false, |s| s + self.policy.min_age_ms < now);
            if !(near_end || expired || over_capacity) {
                break;
            }
            above = self.clean_bag(b, above);
            b += 1;
        }
        ring.oldest = b;
        self.oldest_bag.store(b, Ordering::Release);

        let next = ring.current.checked_add(1).ok_or(CacheError::BagOverflow)?;
        self.open_bag(ring, next, now, true);

        let evicted = before.saturating_sub(self.counters.current());
        if evicted > 0 {
            debug!(evicted, oldest = ring.oldest, current = ring.current, "cleanup pass");
        }

        if self.counters.total().saturating_sub(self.counters.current()) > capacity {
            self.rebuild_indexes();
            self.counters.reset_total_to_current();
        }
        Ok(())
    }

    /// Empties one bag's chain. Entries still claiming bag `number` are
    /// evicted; entries touched after the bag closed are spliced into the
    /// chain of the bag they now claim.
    fn clean_bag(&self, number: u64, mut above: i64) -> i64 {
        let mut node = self.bags.bag(number).head.lock().take();
        while let Some(current) = node {
            let mut state = current.state.lock();
            let next = state.next.take();
            let claimed = current.bag_number();
            if state.value.is_some() && claimed != NO_BAG {
                if claimed == number {
                    // Never touched since this bag closed.
                    above -= 1;
                    state.value = None;
                    current.bag.store(NO_BAG, Ordering::Release);
                    self.counters.dec_current();
                } else {
                    // Touched after close; the deferred relocation happens
                    // here rather than on the touch path.
                    let target = self.bags.bag(claimed);
                    let mut head = target.head.lock();
                    state.next = head.take();
                    *head = Some(Arc::clone(&current));
                }
            }
            drop(state);
            node = next;
        }
        above
    }

    /// Makes bag `n` current: stamps the closing bag, resets the slot, and
    /// re-arms the admission counter and cleanup deadline.
    fn open_bag(&self, ring: &mut RingState, n: u64, now: u64, close_previous: bool) {
        if close_previous {
            self.bags.bag(ring.current).close(now);
        }
        ring.current = n;
        let slot = self.bags.bag(n);
        drop_chain(slot.head.lock().take());
        slot.reopen(now);
        self.current_bag.store(n, Ordering::Release);
        self.items_in_current_bag.store(0, Ordering::Relaxed);
        self.next_validity_check
            .store(now + self.policy.check_interval_ms, Ordering::Relaxed);
    }

    /// Detaches every entry, zeroes all counters, clears registered indexes,
    /// and reopens bag 0. Values are left in place so an entry still held
    /// elsewhere may re-register through a later touch.
    pub(crate) fn clear(&self) {
        let mut ring = self.ring.lock();
        let now = self.now_ms();
        debug!(dropped = self.counters.current(), "clearing cache");
        self.clear_all(&mut ring, now);
    }

    fn clear_all(&self, ring: &mut RingState, now: u64) {
        for bag in self.bags.iter() {
            let mut node = bag.head.lock().take();
            while let Some(current) = node {
                let mut state = current.state.lock();
                node = state.next.take();
                current.bag.store(NO_BAG, Ordering::Release);
            }
            bag.reset_times();
        }
        for index in self.indexes.read().iter().filter_map(Weak::upgrade) {
            index.clear();
        }
        self.counters.reset();
        ring.oldest = 0;
        self.oldest_bag.store(0, Ordering::Release);
        self.open_bag(ring, 0, now, false);
    }

    fn rebuild_indexes(&self) {
        let live: Vec<_> = {
            let mut indexes = self.indexes.write();
            indexes.retain(|weak| weak.upgrade().is_some());
            indexes.iter().filter_map(Weak::upgrade).collect()
        };
        for index in live {
            let size = index.rebuild_from(self);
            debug!(index = index.name(), size, "index rebuilt");
        }
    }

    /// Snapshot of live entries, newest bag to oldest, skipping evicted
    /// entries. A chain truncated by concurrent cleanup simply ends that
    /// bag's walk.
    pub(crate) fn live_entries(&self) -> Vec<Arc<CacheEntry<V>>> {
        let current = self.current_bag.load(Ordering::Acquire);
        let oldest = self.oldest_bag.load(Ordering::Acquire);
        let mut out = Vec::new();
        let mut b = current;
        loop {
            let mut node = self.bags.bag(b).head.lock().clone();
            while let Some(entry) = node {
                if entry.is_live() {
                    out.push(Arc::clone(&entry));
                }
                node = entry.state.lock().next.clone();
            }
            if b <= oldest {
                break;
            }
            b -= 1;
        }
        out
    }

    pub(crate) fn stats_snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            capacity: self.policy.capacity,
            current: self.counters.current(),
            since_creation: self.counters.total(),
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            oldest_bag: self.oldest_bag.load(Ordering::Acquire),
            current_bag: self.current_bag.load(Ordering::Acquire),
            bag_count: self.bags.len(),
            bag_item_limit: self.policy.bag_item_limit,
            min_age: Duration::from_millis(self.policy.min_age_ms),
            max_age: Duration::from_millis(self.policy.max_age_ms),
            cleanup_interval: Duration::from_millis(self.policy.check_interval_ms),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_ring_position_for_test(&self, number: u64) {
        let mut ring = self.ring.lock();
        ring.current = number;
        ring.oldest = number;
        self.current_bag.store(number, Ordering::Release);
        self.oldest_bag.store(number, Ordering::Release);
        self.bags.bag(number).reopen(self.now_ms());
    }

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn debug_validate_invariants(&self) {
        let ring = self.ring.lock();
        assert!(ring.oldest <= ring.current);
        assert_eq!(ring.current, self.current_bag.load(Ordering::Acquire));
        assert_eq!(ring.oldest, self.oldest_bag.load(Ordering::Acquire));
        self.bags.debug_validate_invariants();
        drop(ring);

        let live = self.live_entries().len();
        assert_eq!(
            live,
            self.counters.current(),
            "live chain population diverged from the current counter"
        );
    }
}

/// Detaches a chain iteratively so dropping a long chain cannot recurse
/// through nested entry drops.
fn drop_chain<V>(mut node: Option<Arc<CacheEntry<V>>>) {
    while let Some(entry) = node {
        node = entry.state.lock().next.take();
    }
}
