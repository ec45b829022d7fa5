//! Cache statistics: atomic counters plus a point-in-time snapshot.
//!
//! Counters are updated with relaxed fetch-and-add on the hot paths; ring
//! positions in the snapshot come from mirrors that are written under the
//! lifespan manager's lock.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Live counters shared between the facade, indexes, and lifespan manager.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    current: AtomicUsize,
    total: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    /// Number of entries currently attributed to a bag.
    pub(crate) fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Cumulative admissions since construction or the last rebuild.
    pub(crate) fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_current(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec_current(&self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// After an index rebuild the dead references are gone, so the
    /// cumulative count collapses back to the live population.
    pub(crate) fn reset_total_to_current(&self) {
        self.total.store(self.current(), Ordering::Relaxed);
    }

    /// Zeroes every counter. Used by `clear` and the aged-out reset.
    pub(crate) fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Read-only snapshot of cache statistics and retention parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Target item count (soft; see `min_age`).
    pub capacity: usize,
    /// Entries currently attributed to a bag.
    pub current: usize,
    /// Unique admissions since construction or the last index rebuild.
    pub since_creation: usize,
    /// Lookups that resolved to a live entry or a shared in-flight load.
    pub hits: u64,
    /// Lookups or admissions that created (or failed to find) an entry.
    pub misses: u64,
    /// Oldest bag number still holding entries.
    pub oldest_bag: u64,
    /// Bag number currently receiving admissions.
    pub current_bag: u64,
    /// Number of slots in the bag ring.
    pub bag_count: usize,
    /// Fresh admissions per bag before cleanup is forced.
    pub bag_item_limit: usize,
    /// Minimum retention from last touch.
    pub min_age: Duration,
    /// Maximum retention from last touch.
    pub max_age: Duration,
    /// Wall-clock period after which cleanup runs regardless of load.
    pub cleanup_interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = CacheCounters::default();
        assert_eq!(counters.current(), 0);
        assert_eq!(counters.total(), 0);
        assert_eq!(counters.hits(), 0);
        assert_eq!(counters.misses(), 0);
    }

    #[test]
    fn counters_track_increments() {
        let counters = CacheCounters::default();
        counters.inc_current();
        counters.inc_current();
        counters.inc_total();
        counters.inc_total();
        counters.inc_hit();
        counters.inc_miss();
        counters.dec_current();

        assert_eq!(counters.current(), 1);
        assert_eq!(counters.total(), 2);
        assert_eq!(counters.hits(), 1);
        assert_eq!(counters.misses(), 1);
    }

    #[test]
    fn reset_total_collapses_to_current() {
        let counters = CacheCounters::default();
        for _ in 0..5 {
            counters.inc_current();
            counters.inc_total();
        }
        counters.dec_current();
        counters.dec_current();
        counters.reset_total_to_current();
        assert_eq!(counters.total(), 3);
        assert_eq!(counters.current(), 3);
    }

    #[test]
    fn reset_zeroes_everything() {
        let counters = CacheCounters::default();
        counters.inc_current();
        counters.inc_total();
        counters.inc_hit();
        counters.inc_miss();
        counters.reset();
        assert_eq!(counters.current(), 0);
        assert_eq!(counters.total(), 0);
        assert_eq!(counters.hits(), 0);
        assert_eq!(counters.misses(), 0);
    }
}
