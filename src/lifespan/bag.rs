//! Age bags and the fixed ring that holds them.
//!
//! A bag is a passive time-bounded bucket: the open interval
//! `[start, stop)` plus the head of a singly linked chain of entries.
//! The ring is addressed by a monotonically increasing bag number; slot
//! `number % len` holds bag `number`. The ring is sized so the time span it
//! covers strictly exceeds the maximum retention age, which means reaching
//! the oldest occupied slot implies the entries there are either over-age
//! or over-capacity.
//!
//! ```text
//!   bag number:   ... 41   42   43   44   45 (current)
//!   ring slot:        [1]  [2]  [3]  [4]  [5]      (len = 8, 45 % 8 = 5)
//!                      |         |
//!                    head ->   head -> e3 -> e1
//!                      e7
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::lifespan::entry::CacheEntry;

/// Millisecond sentinel for an unset bag timestamp.
pub(crate) const UNSET: u64 = u64::MAX;

/// Time-bounded bucket holding a chain of entries.
pub(crate) struct AgeBag<V> {
    /// Milliseconds since the manager epoch when the bag opened.
    start: AtomicU64,
    /// Milliseconds since the manager epoch when the bag closed, or
    /// [`UNSET`] while the bag is still current.
    stop: AtomicU64,
    /// Head of the entry chain. The chain may transiently hold entries
    /// whose bag number names a newer bag; cleanup relocates those.
    pub(crate) head: Mutex<Option<Arc<CacheEntry<V>>>>,
}

impl<V> AgeBag<V> {
    fn new() -> Self {
        Self {
            start: AtomicU64::new(UNSET),
            stop: AtomicU64::new(UNSET),
            head: Mutex::new(None),
        }
    }

    pub(crate) fn start_time(&self) -> Option<u64> {
        match self.start.load(Ordering::Acquire) {
            UNSET => None,
            ms => Some(ms),
        }
    }

    pub(crate) fn stop_time(&self) -> Option<u64> {
        match self.stop.load(Ordering::Acquire) {
            UNSET => None,
            ms => Some(ms),
        }
    }

    /// Stamps the closing time. Called when a newer bag becomes current.
    pub(crate) fn close(&self, now_ms: u64) {
        self.stop.store(now_ms, Ordering::Release);
    }

    /// Reopens the slot for a new bag number: fresh start, no stop.
    pub(crate) fn reopen(&self, now_ms: u64) {
        self.start.store(now_ms, Ordering::Release);
        self.stop.store(UNSET, Ordering::Release);
    }

    /// Forgets both timestamps. Used by full clears.
    pub(crate) fn reset_times(&self) {
        self.start.store(UNSET, Ordering::Release);
        self.stop.store(UNSET, Ordering::Release);
    }
}

/// Fixed-size circular array of bags addressed by monotone bag number.
pub(crate) struct BagRing<V> {
    bags: Box<[AgeBag<V>]>,
}

impl<V> BagRing<V> {
    /// Creates a ring with `len` slots. `len` must be non-zero.
    pub(crate) fn new(len: usize) -> Self {
        assert!(len > 0, "bag ring must have at least one slot");
        let mut bags = Vec::with_capacity(len);
        bags.resize_with(len, AgeBag::new);
        Self {
            bags: bags.into_boxed_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bags.len()
    }

    /// Slot holding bag `number`.
    pub(crate) fn bag(&self, number: u64) -> &AgeBag<V> {
        &self.bags[(number % self.bags.len() as u64) as usize]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &AgeBag<V>> {
        self.bags.iter()
    }

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn debug_validate_invariants(&self) {
        assert!(!self.bags.is_empty());
        for bag in self.bags.iter() {
            if let (Some(start), Some(stop)) = (bag.start_time(), bag.stop_time()) {
                assert!(start <= stop, "bag closed before it opened");
            }
        }
    }
}
