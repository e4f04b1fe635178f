mod config;
mod timed;
mod metrics;
mod policy;

pub use config::{CacheConfig, EvictionMode};
pub use timed::{EntryStats, ExpirySweep, TimedCache};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use policy::{eviction_count, staleness_score};
