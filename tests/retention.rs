// ==============================================
// RETENTION SCENARIOS (deterministic clock)
// ==============================================
use std::sync::Arc;
use std::time::Duration;

use fluidcache::builder::FluidCacheBuilder;
use fluidcache::cache::FluidCache;
use fluidcache::clock::{Clock, ManualClock};
use fluidcache::error::CacheError;

#[derive(Debug)]
struct Item {
    key: u64,
    tag: &'static str,
}

fn item(key: u64, tag: &'static str) -> Arc<Item> {
    Arc::new(Item { key, tag })
}

fn build(
    capacity: usize,
    min_age: Duration,
    max_age: Duration,
) -> (FluidCache<Item>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let cache = FluidCacheBuilder::new(capacity, min_age, max_age)
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .try_build::<Item>()
        .unwrap();
    cache.add_index("by_key", |i: &Item| i.key);
    (cache, clock)
}

#[test]
fn sequential_miss_load_of_a_thousand_items() {
    let (cache, clock) = build(1000, Duration::from_secs(5), Duration::from_secs(10));

    for key in 0..1000 {
        cache.add(item(key, "fill")).unwrap();
        clock.advance(Duration::from_millis(10));
    }

    let stats = cache.stats();
    assert_eq!(stats.since_creation, 1000);
    assert_eq!(stats.current, 1000);
    assert_eq!(stats.misses, 1000);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn items_under_min_age_survive_capacity_pressure() {
    let (cache, clock) = build(20, Duration::from_secs(300), Duration::from_secs(600));

    let the_user = item(0, "user");
    cache.add(Arc::clone(&the_user)).unwrap();
    for key in 1..=20 {
        cache.add(item(key, "filler")).unwrap();
    }
    assert!(cache.stats().current > 20);

    // One minute short of the minimum age: still immune to eviction.
    clock.advance(Duration::from_secs(240));
    let found = cache.get("by_key", &0u64).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&found, &the_user));
}

#[tokio::test]
async fn items_past_min_age_yield_to_capacity_pressure() {
    let (cache, clock) = build(20, Duration::from_secs(300), Duration::from_secs(600));

    let the_user = item(0, "user");
    cache.add(Arc::clone(&the_user)).unwrap();
    for key in 1..=20 {
        cache.add(item(key, "filler")).unwrap();
    }

    // Two minutes past the minimum age: the oldest bag is retired and the
    // next lookup reloads a fresh object.
    clock.advance(Duration::from_secs(420));
    let reloaded = cache
        .get_with("by_key", &0u64, |key| {
            let key = *key;
            Some(async move { Ok(Some(Arc::new(Item { key, tag: "reloaded" }))) })
        })
        .await
        .unwrap()
        .unwrap();
    assert!(!Arc::ptr_eq(&reloaded, &the_user));
    assert_eq!(reloaded.tag, "reloaded");

    // The replacement is now canonical.
    let again = cache.get("by_key", &0u64).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&again, &reloaded));
}

#[tokio::test]
async fn entries_always_expire_after_max_age() {
    let (cache, clock) = build(1000, Duration::from_secs(5), Duration::from_secs(10));

    cache.add(item(1, "short-lived")).unwrap();
    assert_eq!(cache.stats().current, 1);

    // Probe with an unrelated key so the entry under test is not touched:
    // the first pass closes its bag, the second finds the bag over-age.
    clock.advance(Duration::from_secs(11));
    let _ = cache.get("by_key", &999u64).await.unwrap();
    clock.advance(Duration::from_secs(11));
    let _ = cache.get("by_key", &999u64).await.unwrap();

    let gone = cache.get("by_key", &1u64).await.unwrap();
    assert!(gone.is_none());
    assert_eq!(cache.stats().current, 0);
}

#[tokio::test]
async fn cleanup_restores_capacity_once_entries_are_evictable() {
    let (cache, clock) = build(10, Duration::from_secs(1), Duration::from_secs(600));

    for key in 0..40 {
        cache.add(item(key, "fill")).unwrap();
    }
    assert!(cache.stats().current > 10);

    clock.advance(Duration::from_secs(200));
    let _ = cache.get("by_key", &999u64).await.unwrap();

    assert!(cache.stats().current <= 10);
}

#[test]
fn accumulated_dead_references_trigger_a_rebuild() {
    let (cache, clock) = build(1, Duration::ZERO, Duration::from_secs(2));
    let by_key = cache.index::<u64>("by_key").unwrap();

    for key in 0..4 {
        cache.add(item(key, "wave1")).unwrap();
    }
    clock.advance(Duration::from_secs(3));
    cache.add(item(100, "wave2")).unwrap();

    // Everything from the first wave expired; the rebuild collapsed the
    // cumulative count onto the survivors and dropped dead references.
    let stats = cache.stats();
    assert_eq!(stats.current, 1);
    assert_eq!(stats.since_creation, 1);
    assert_eq!(by_key.len(), 1);
}

#[tokio::test]
async fn lookups_never_return_evicted_values() {
    let (cache, clock) = build(5, Duration::ZERO, Duration::from_secs(2));

    for key in 0..5 {
        cache.add(item(key, "fill")).unwrap();
    }
    clock.advance(Duration::from_secs(3));

    for key in 0..5u64 {
        match cache.get("by_key", &key).await {
            Ok(Some(found)) => assert_eq!(found.key, key),
            Ok(None) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
}

#[tokio::test]
async fn validate_predicate_failure_clears_everything() {
    let clock = Arc::new(ManualClock::new());
    let cache = FluidCacheBuilder::new(100, Duration::ZERO, Duration::from_secs(60))
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .validate(|| false)
        .try_build::<Item>()
        .unwrap();
    cache.add_index("by_key", |i: &Item| i.key);

    cache.add(item(1, "doomed")).unwrap();
    clock.advance(Duration::from_secs(61));
    let gone: Result<_, CacheError> = cache.get("by_key", &1u64).await;

    assert!(gone.unwrap().is_none());
    assert_eq!(cache.stats().current, 0);
}
