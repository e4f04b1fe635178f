//! Memory optimization utilities for long-lived client processes: a TTL cache with scored
//! eviction, a garbage collector for caches, storage, listeners and images, an object pool,
//! a yielding batch processor and a heap-aware preloader, mounted together as a
//! [`MemoryOptimizer`].

pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod gc;
pub mod logger;
pub mod monitor;
pub mod optimizer;
pub mod pool;
pub mod preload;
pub mod probe;
pub mod schedule;
pub mod utils;

pub use batch::BatchProcessor;
pub use cache::{EvictionMode, TimedCache};
pub use config::OptimizerConfig;
pub use errors::{OptimizerError, PreloadError};
pub use gc::{GarbageCollector, SweepReport};
pub use monitor::MemoryStats;
pub use optimizer::{MemoryOptimizer, OptimizerBuilder};
pub use pool::ObjectPool;
pub use preload::{MemoryAwarePreloader, ResourceType};
pub use probe::HeapUsage;

/// Installs file logging from `MEMOPT_LOG_*` (defaults: working directory, `info`).
pub fn init() -> Result<(), OptimizerError> {
    logger::configure_from_env()
}
