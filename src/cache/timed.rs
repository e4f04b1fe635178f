use crate::cache::config::{CacheConfig, EvictionMode};
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::cache::policy::{purge_expired, select_victims};
use crate::clock::{self, SharedClock};
use crate::utils::num::{duration_ms, usize_to_u64};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Represents an entry in the cache.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
    pub value: Arc<V>,
    pub expiry_ms: u64,
    pub last_accessed_ms: u64,
    pub access_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>, now_ms: u64, ttl: Duration) -> Self {
        Self {
            value,
            expiry_ms: now_ms.saturating_add(duration_ms(ttl)),
            last_accessed_ms: now_ms,
            access_count: 1,
        }
    }

    /// Shared by lazy expiry on read and the eager sweep.
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expiry_ms
    }

    fn touch(&mut self, now_ms: u64) {
        self.access_count += 1;
        self.last_accessed_ms = now_ms;
    }
}

/// Read-only view of an entry's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStats {
    pub access_count: u64,
    pub last_accessed_ms: u64,
    pub expiry_ms: u64,
}

/// Anything holding TTL'd entries that a sweeper can purge.
pub trait ExpirySweep: Send + Sync {
    /// Removes expired entries. Returns number evicted.
    fn sweep_expired(&self) -> usize;
    fn len(&self) -> usize;
}

/// A thread-safe TTL cache keyed by string, with scored eviction at capacity.
///
/// Values are handed out as `Arc<V>`, so a hit returns the very instance the factory built.
pub struct TimedCache<V> {
    store: Arc<Mutex<LruCache<String, CacheEntry<V>>>>,
    config: Arc<RwLock<CacheConfig>>, // runtime adjustable
    metrics: Arc<CacheMetrics>,
    clock: SharedClock,
}

impl<V> Clone for TimedCache<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V> TimedCache<V> {
    /// Creates a cache with the given capacity and the system clock.
    pub fn new(max_cache_size: usize) -> Self {
        Self::new_with_config(CacheConfig { max_cache_size, ..Default::default() }, clock::system())
    }

    pub fn new_with_config(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            store: Arc::new(Mutex::new(LruCache::unbounded())),
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(CacheMetrics::default()),
            clock,
        }
    }

    /// Returns the cached value for `key`, or builds it with `factory` and caches it for `ttl`.
    ///
    /// The factory runs at most once per miss, under the cache lock; it must not call back
    /// into this cache.
    pub fn get_or_insert_with<F>(&self, key: &str, ttl: Duration, factory: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        match self.try_get_or_insert_with(key, ttl, || Ok::<V, Infallible>(factory())) {
            Ok(v) => v,
            Err(never) => match never {},
        }
    }

    /// Fallible variant: a factory error is returned as-is and nothing is cached.
    pub fn try_get_or_insert_with<F, E>(&self, key: &str, ttl: Duration, factory: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let mut store = self.store.lock();
        let now = self.clock.now_ms();

        if let Some(entry) = store.get_mut(key) {
            if !entry.is_expired(now) {
                entry.touch(now);
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.value));
            }
        }
        if store.peek(key).is_some_and(|e| e.is_expired(now)) {
            // Lazy eviction on access
            store.pop(key);
            self.metrics.ttl_evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);

        self.metrics.factory_calls.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(factory()?);
        self.put_locked(&mut store, key, Arc::clone(&value), ttl, now);
        Ok(value)
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: &str, value: V, ttl: Duration) -> Arc<V> {
        let mut store = self.store.lock();
        let now = self.clock.now_ms();
        let value = Arc::new(value);
        self.put_locked(&mut store, key, Arc::clone(&value), ttl, now);
        value
    }

    /// Looks up a live value without touching its access statistics.
    pub fn peek(&self, key: &str) -> Option<Arc<V>> {
        let now = self.clock.now_ms();
        self.store
            .lock()
            .peek(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| Arc::clone(&e.value))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    pub fn entry_stats(&self, key: &str) -> Option<EntryStats> {
        self.store.lock().peek(key).map(|e| EntryStats {
            access_count: e.access_count,
            last_accessed_ms: e.last_accessed_ms,
            expiry_ms: e.expiry_ms,
        })
    }

    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let removed = self.store.lock().pop(key).map(|e| e.value);
        if removed.is_some() {
            self.metrics.removes.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        let mut store = self.store.lock();
        let n = store.len();
        store.clear();
        self.metrics.removes.fetch_add(usize_to_u64(n), Ordering::Relaxed);
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Force a TTL purge now. Returns number evicted.
    pub fn purge_expired_now(&self) -> usize {
        let now = self.clock.now_ms();
        let evicted = purge_expired(&mut self.store.lock(), now);
        if evicted > 0 {
            self.metrics.ttl_evictions.fetch_add(usize_to_u64(evicted), Ordering::Relaxed);
            crate::dev_event!("cache", "ttl_purge", evicted = evicted);
        }
        evicted
    }

    pub fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn max_cache_size(&self) -> usize {
        self.config.read().max_cache_size
    }

    pub fn eviction_mode(&self) -> EvictionMode {
        self.config.read().eviction_mode
    }

    /// Runtime config updates
    pub fn set_eviction_mode(&self, mode: EvictionMode) {
        self.config.write().eviction_mode = mode;
    }

    /// Shrinking below the current size evicts immediately.
    pub fn set_capacity(&self, max_cache_size: usize) {
        self.config.write().max_cache_size = max_cache_size.max(1);
        let mut store = self.store.lock();
        let now = self.clock.now_ms();
        let cap = self.max_cache_size();
        if store.len() > cap {
            self.evict_until(&mut store, now, cap);
        }
    }

    fn put_locked(
        &self,
        store: &mut LruCache<String, CacheEntry<V>>,
        key: &str,
        value: Arc<V>,
        ttl: Duration,
        now: u64,
    ) {
        if !store.contains(key) {
            // Make room for one more entry
            let cap = self.max_cache_size().max(1);
            if store.len() >= cap {
                self.evict_until(store, now, cap - 1);
            }
        }
        store.put(key.to_owned(), CacheEntry::new(value, now, ttl));
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Evicts rounds of victims until at most `target` entries remain.
    fn evict_until(&self, store: &mut LruCache<String, CacheEntry<V>>, now: u64, target: usize) {
        let mode = self.eviction_mode();
        let mut evicted_total = 0usize;
        while store.len() > target {
            let victims = select_victims(store, mode, now);
            if victims.is_empty() {
                break;
            }
            for key in &victims {
                store.pop(key);
            }
            evicted_total += victims.len();
        }
        if evicted_total > 0 {
            self.metrics.score_evictions.fetch_add(usize_to_u64(evicted_total), Ordering::Relaxed);
            log::debug!("cache evicted {evicted_total} entries ({mode:?}), {} remain", store.len());
            crate::dev_event!("cache", "evict", evicted = evicted_total, remaining = store.len());
        }
    }
}

impl<V: Send + Sync> ExpirySweep for TimedCache<V> {
    fn sweep_expired(&self) -> usize {
        self.purge_expired_now()
    }

    fn len(&self) -> usize {
        TimedCache::len(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache_with_clock(cap: usize) -> (TimedCache<String>, ManualClock) {
        let clock = ManualClock::new(10_000);
        let cache = TimedCache::new_with_config(
            CacheConfig { max_cache_size: cap, ..Default::default() },
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn hit_updates_stats_without_calling_factory() {
        let (cache, clock) = cache_with_clock(4);
        let ttl = Duration::from_millis(1_000);
        let first = cache.get_or_insert_with("a", ttl, || "A".to_string());
        clock.advance(10);
        let second = cache.get_or_insert_with("a", ttl, || panic!("factory must not run on a hit"));
        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.entry_stats("a").unwrap();
        assert_eq!(stats.access_count, 2);
        assert_eq!(stats.last_accessed_ms, 10_010);
        assert_eq!(stats.expiry_ms, 11_000);
    }

    #[test]
    fn failed_factory_caches_nothing() {
        let (cache, _clock) = cache_with_clock(4);
        let res: Result<Arc<String>, &str> =
            cache.try_get_or_insert_with("k", Duration::from_secs(1), || Err("boom"));
        assert_eq!(res.unwrap_err(), "boom");
        assert!(cache.is_empty());
        assert_eq!(cache.metrics_snapshot().factory_calls, 1);
    }

    #[test]
    fn replacing_existing_key_does_not_evict() {
        let (cache, _clock) = cache_with_clock(2);
        cache.insert("a", "1".into(), Duration::from_secs(1));
        cache.insert("b", "2".into(), Duration::from_secs(1));
        cache.insert("a", "3".into(), Duration::from_secs(1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek("a").as_deref().map(String::as_str), Some("3"));
        assert_eq!(cache.metrics_snapshot().score_evictions, 0);
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let (cache, _clock) = cache_with_clock(8);
        for i in 0..8 {
            cache.insert(&format!("k{i}"), i.to_string(), Duration::from_secs(60));
        }
        cache.set_capacity(3);
        assert!(cache.len() <= 3);
    }
}
