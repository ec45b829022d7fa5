//! Validated construction of a [`FluidCache`].
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use fluidcache::builder::FluidCacheBuilder;
//!
//! let cache = FluidCacheBuilder::new(1000, Duration::from_secs(5), Duration::from_secs(10))
//!     .try_build::<String>()
//!     .unwrap();
//! assert_eq!(cache.stats().capacity, 1000);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::cache::FluidCache;
use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::lifespan::{
    LifespanManager, RetentionPolicy, ValidateFn, CHECK_INTERVAL_CAP, EMPTY_BUFFER, MAX_AGE_CAP,
    PREFERRED_BAGS,
};
use crate::stats::CacheCounters;

/// Builder for [`FluidCache`] instances.
///
/// `capacity` is a soft target: entries younger than `min_age` may push the
/// cache over it, and entries older than `max_age` are dropped even under
/// it. `max_age` is clamped to 12 hours.
pub struct FluidCacheBuilder {
    capacity: usize,
    min_age: Duration,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    validate: Option<ValidateFn>,
}

impl FluidCacheBuilder {
    /// Starts a builder with the three retention parameters.
    pub fn new(capacity: usize, min_age: Duration, max_age: Duration) -> Self {
        Self {
            capacity,
            min_age,
            max_age,
            clock: Arc::new(SystemClock),
            validate: None,
        }
    }

    /// Substitutes the wall-clock source (deterministic clocks in tests).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Installs a predicate consulted during cleanup; returning `false`
    /// clears the whole cache.
    pub fn validate(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.validate = Some(Box::new(predicate));
        self
    }

    /// Validates the parameters and builds the cache.
    pub fn try_build<V>(self) -> Result<FluidCache<V>, ConfigError>
    where
        V: Send + Sync + 'static,
    {
        if self.capacity == 0 {
            return Err(ConfigError::new("capacity must be greater than zero"));
        }
        if self.max_age.is_zero() {
            return Err(ConfigError::new("max_age must be greater than zero"));
        }

        // Validate min_age against the clamped bound, so a min_age that only
        // exceeds max_age after clamping is still rejected rather than
        // silently shortened.
        let max_age = self.max_age.min(MAX_AGE_CAP);
        if self.min_age > max_age {
            return Err(ConfigError::new("min_age must not exceed max_age"));
        }
        let min_age = self.min_age;
        let check_interval = max_age.min(CHECK_INTERVAL_CAP);

        let max_age_ms = max_age.as_millis() as u64;
        let check_interval_ms = (check_interval.as_millis() as u64).max(1);
        let covering_bags = (max_age_ms + check_interval_ms - 1) / check_interval_ms;
        let ring_len = covering_bags as usize + PREFERRED_BAGS + EMPTY_BUFFER as usize;

        let policy = RetentionPolicy {
            capacity: self.capacity,
            min_age_ms: min_age.as_millis() as u64,
            max_age_ms,
            check_interval_ms,
            bag_item_limit: (self.capacity / PREFERRED_BAGS).max(1),
        };
        let counters = Arc::new(CacheCounters::default());
        let manager = LifespanManager::new(
            policy,
            ring_len,
            self.clock,
            self.validate,
            Arc::clone(&counters),
        );
        Ok(FluidCache::from_parts(manager, counters))
    }
}
