//! fluidcache: a time-sliced, thread-safe object cache.
//!
//! Behaves like a bounded LRU with two softening constraints: entries
//! younger than a minimum age are never evicted (even over capacity) and
//! entries older than a maximum age always are (even under capacity).
//! Recency is tracked by attributing entries to time-sliced "age bags"
//! instead of maintaining an ordered list, so a touch is amortized O(1) and
//! takes no global lock. Any number of secondary indexes can map derived
//! keys to the same set of entries, each with an optional asynchronous
//! factory that runs at most once per key across concurrent misses.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fluidcache::prelude::*;
//!
//! struct User { id: u64 }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = FluidCacheBuilder::new(1000, Duration::from_secs(5), Duration::from_secs(60))
//!     .try_build::<User>()
//!     .unwrap();
//! let by_id = cache.add_index("by_id", |user: &User| user.id);
//!
//! let user = by_id
//!     .get_with(&42, |id| {
//!         let id = *id;
//!         Some(async move { Ok(Some(Arc::new(User { id }))) })
//!     })
//!     .await?;
//! assert_eq!(user.unwrap().id, 42);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod cache;
pub mod clock;
pub mod error;
pub mod index;
pub mod lifespan;
pub mod prelude;
pub mod stats;
