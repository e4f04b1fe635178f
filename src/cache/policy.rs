use crate::cache::config::EvictionMode;
use crate::cache::timed::CacheEntry;
use lru::LruCache;

/// Fraction of the cache removed per eviction round, as a divisor.
const EVICTION_DIVISOR: usize = 4;

/// `access_count * (now - last_accessed)`. Low scores are evicted first.
#[inline]
#[must_use]
pub fn staleness_score(access_count: u64, last_accessed_ms: u64, now_ms: u64) -> u128 {
    u128::from(access_count) * u128::from(now_ms.saturating_sub(last_accessed_ms))
}

/// Entries removed for a cache holding `len` entries: the lowest quartile, at least one.
#[inline]
#[must_use]
pub fn eviction_count(len: usize) -> usize {
    (len / EVICTION_DIVISOR).max(1).min(len)
}

/// Picks the keys to evict. Candidates are visited from least to most recently used and
/// sorted stably, so ties fall to the least recently used entry.
pub(crate) fn select_victims<V>(
    store: &LruCache<String, CacheEntry<V>>,
    mode: EvictionMode,
    now_ms: u64,
) -> Vec<String> {
    let count = eviction_count(store.len());
    if store.is_empty() {
        return Vec::new();
    }
    match mode {
        EvictionMode::LruOnly => store.iter().rev().take(count).map(|(k, _)| k.clone()).collect(),
        EvictionMode::FrequencyStaleness => {
            let mut scored: Vec<(u128, &String)> = store
                .iter()
                .rev()
                .map(|(k, e)| (staleness_score(e.access_count, e.last_accessed_ms, now_ms), k))
                .collect();
            scored.sort_by_key(|(score, _)| *score);
            scored.into_iter().take(count).map(|(_, k)| k.clone()).collect()
        }
        EvictionMode::LfuOnly => {
            let mut scored: Vec<(u64, &String)> =
                store.iter().rev().map(|(k, e)| (e.access_count, k)).collect();
            scored.sort_by_key(|(freq, _)| *freq);
            scored.into_iter().take(count).map(|(_, k)| k.clone()).collect()
        }
    }
}

/// Removes expired entries. Returns number evicted.
pub(crate) fn purge_expired<V>(store: &mut LruCache<String, CacheEntry<V>>, now_ms: u64) -> usize {
    let expired: Vec<String> =
        store.iter().filter(|(_, e)| e.is_expired(now_ms)).map(|(k, _)| k.clone()).collect();
    for key in &expired {
        store.pop(key);
    }
    expired.len()
}
