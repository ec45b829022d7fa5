pub use crate::builder::FluidCacheBuilder;
pub use crate::cache::FluidCache;
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{CacheError, ConfigError};
pub use crate::index::{CacheIndex, FactoryFuture, ItemFactory};
pub use crate::stats::CacheStatsSnapshot;
