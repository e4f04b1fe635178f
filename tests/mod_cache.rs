use memopt::cache::{CacheConfig, EvictionMode, TimedCache};
use memopt::clock::ManualClock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn timed_cache(cap: usize, mode: EvictionMode) -> (TimedCache<&'static str>, ManualClock) {
    let clock = ManualClock::new(0);
    let cache = TimedCache::new_with_config(
        CacheConfig { max_cache_size: cap, eviction_mode: mode },
        Arc::new(clock.clone()),
    );
    (cache, clock)
}

#[test]
fn worked_example_with_two_slots() {
    let (cache, clock) = timed_cache(2, EvictionMode::FrequencyStaleness);
    let ttl = Duration::from_millis(1_000);
    let calls = AtomicUsize::new(0);

    let a = cache.get_or_insert_with("a", ttl, || {
        calls.fetch_add(1, Ordering::SeqCst);
        "A"
    });
    assert_eq!(*a, "A");
    clock.advance(1);
    let again = cache.get_or_insert_with("a", ttl, || {
        calls.fetch_add(1, Ordering::SeqCst);
        "A2"
    });
    assert_eq!(*again, "A");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.entry_stats("a").unwrap().access_count, 2);

    clock.advance(1);
    cache.get_or_insert_with("b", ttl, || "B");
    clock.advance(1);
    // a: 2 * (3 - 1) = 4, b: 1 * (3 - 2) = 1, so b goes.
    cache.get_or_insert_with("c", ttl, || "C");
    assert_eq!(cache.len(), 2);
    assert!(cache.contains_key("a"));
    assert!(!cache.contains_key("b"));
    assert!(cache.contains_key("c"));
    assert_eq!(cache.metrics_snapshot().score_evictions, 1);
}

#[test]
fn ttl_boundary_is_exclusive() {
    let (cache, clock) = timed_cache(4, EvictionMode::FrequencyStaleness);
    let ttl = Duration::from_millis(500);
    let first = cache.get_or_insert_with("k", ttl, || "v1");
    clock.advance(499);
    let hit = cache.get_or_insert_with("k", ttl, || "v2");
    assert!(Arc::ptr_eq(&first, &hit));
    clock.advance(1);
    assert!(!cache.contains_key("k"));
    let fresh = cache.get_or_insert_with("k", ttl, || "v2");
    assert_eq!(*fresh, "v2");
    let m = cache.metrics_snapshot();
    assert_eq!(m.factory_calls, 2);
    assert_eq!(m.ttl_evictions, 1);
}

#[test]
fn sweep_and_lazy_expiry_agree() {
    let (cache, clock) = timed_cache(8, EvictionMode::FrequencyStaleness);
    cache.insert("short", "s", Duration::from_millis(10));
    cache.insert("long", "l", Duration::from_millis(100));
    clock.advance(10);
    assert!(cache.peek("short").is_none());
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.purge_expired_now(), 1);
    assert_eq!(cache.purge_expired_now(), 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn lru_mode_evicts_oldest_access() {
    let (cache, clock) = timed_cache(3, EvictionMode::LruOnly);
    let ttl = Duration::from_secs(60);
    for k in ["x", "y", "z"] {
        cache.insert(k, "v", ttl);
        clock.advance(5);
    }
    cache.get_or_insert_with("x", ttl, || unreachable!());
    cache.insert("w", "v", ttl);
    assert!(!cache.contains_key("y"));
    assert_eq!(cache.len(), 3);
}

#[test]
fn shrinking_capacity_evicts_down_to_bound() {
    let (cache, _clock) = timed_cache(10, EvictionMode::FrequencyStaleness);
    for k in ["a", "b", "c", "d", "e", "f"] {
        cache.insert(k, "v", Duration::from_secs(60));
    }
    cache.set_capacity(2);
    assert!(cache.len() <= 2);
    assert_eq!(cache.max_cache_size(), 2);
}

#[test]
fn clones_share_entries_across_threads() {
    let cache: TimedCache<u64> = TimedCache::new(64);
    let calls = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            std::thread::spawn(move || {
                cache.get_or_insert_with("shared", Duration::from_secs(60), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    42
                })
            })
        })
        .collect();
    for h in handles {
        assert_eq!(*h.join().unwrap(), 42);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.entry_stats("shared").unwrap().access_count, 8);
}
