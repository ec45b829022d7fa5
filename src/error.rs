//! Error types for the fluidcache library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when cache construction parameters are invalid
//!   (e.g. zero capacity, `min_age` exceeding `max_age`).
//! - [`CacheError`]: Runtime errors surfaced by cache operations. `Clone` so
//!   that a single load result can be handed to every waiter of a shared
//!   in-flight load.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use fluidcache::builder::FluidCacheBuilder;
//!
//! let bad = FluidCacheBuilder::new(0, Duration::from_secs(1), Duration::from_secs(10))
//!     .try_build::<String>();
//! assert!(bad.unwrap_err().to_string().contains("capacity"));
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache construction parameters are invalid.
///
/// Produced by [`FluidCacheBuilder::try_build`](crate::builder::FluidCacheBuilder::try_build).
/// Carries a human-readable description of which parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Runtime error surfaced by cache operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A factory returned no deferred computation where one was expected.
    InvalidFactory,
    /// Bag number arithmetic exceeded its range. The aged-out reset fires
    /// long before this can happen; seeing it indicates a bug.
    BagOverflow,
    /// A user-supplied factory failed; the message is the factory's own.
    /// No entry was inserted and no counters were changed.
    Factory(String),
}

impl CacheError {
    /// Wraps a factory failure message.
    #[inline]
    pub fn factory(msg: impl Into<String>) -> Self {
        Self::Factory(msg.into())
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFactory => f.write_str("factory returned no deferred value"),
            Self::BagOverflow => f.write_str("bag number exceeded its maximum"),
            Self::Factory(msg) => write!(f, "factory failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("capacity must be > 0");
        assert_eq!(err.to_string(), "capacity must be > 0");
    }

    #[test]
    fn config_message_accessor() {
        let err = ConfigError::new("test");
        assert_eq!(err.message(), "test");
    }

    #[test]
    fn config_clone_and_eq() {
        let a = ConfigError::new("x");
        let b = a.clone();
        assert_eq!(a, b);
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }

    // -- CacheError -------------------------------------------------------

    #[test]
    fn cache_error_display_variants() {
        assert!(CacheError::InvalidFactory.to_string().contains("deferred"));
        assert!(CacheError::BagOverflow.to_string().contains("bag number"));
        assert_eq!(
            CacheError::factory("boom").to_string(),
            "factory failed: boom"
        );
    }

    #[test]
    fn cache_error_clone_and_eq() {
        let a = CacheError::factory("io");
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, CacheError::InvalidFactory);
    }

    #[test]
    fn cache_error_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<CacheError>();
    }
}
