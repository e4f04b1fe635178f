use serde::{Deserialize, Serialize};

/// Victim selection used when the cache is full.
///
/// `FrequencyStaleness` is the historical policy: score = `access_count * (now - last_accessed)`,
/// lowest quartile removed. The product ranks a hot entry with an old timestamp alongside a
/// genuinely cold one, so `LruOnly` and `LfuOnly` are offered as explicit alternatives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    #[default]
    FrequencyStaleness,
    LruOnly,
    LfuOnly,
}

/// Configuration for the cache.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub max_cache_size: usize,
    pub eviction_mode: EvictionMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_cache_size: 50, eviction_mode: EvictionMode::FrequencyStaleness }
    }
}
