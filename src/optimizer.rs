//! The mounted optimizer: one cache, one collector, one preloader and one heap monitor with
//! a shared lifecycle.
//!
//! Only one optimizer may be mounted per process. The slot is claimed by
//! [`OptimizerBuilder::mount`] and released by [`MemoryOptimizer::unmount`] or drop.

use crate::batch::{BatchProcessor, DEFAULT_BATCH_DELAY};
use crate::cache::{CacheMetricsSnapshot, ExpirySweep, TimedCache};
use crate::clock::{self, SharedClock};
use crate::config::OptimizerConfig;
use crate::errors::OptimizerError;
use crate::gc::{
    GarbageCollector, GcMetricsSnapshot, ImageId, ImageRegistry, ListenerRegistry, MemoryStorage, SharedStore,
    StoragePruner, SweepReport, Viewport,
};
use crate::monitor::{MemoryMonitor, MemoryStats};
use crate::pool::ObjectPool;
use crate::preload::{MemoryAwarePreloader, NoopFetcher, ResourceFetcher};
use crate::probe::{NoopProbe, SharedProbe};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

static MOUNTED: AtomicBool = AtomicBool::new(false);

/// Claim on the process-wide mount slot; released on drop.
struct MountSlot(());

impl MountSlot {
    fn claim() -> Result<Self, OptimizerError> {
        MOUNTED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(()))
            .map_err(|_| OptimizerError::AlreadyMounted)
    }
}

impl Drop for MountSlot {
    fn drop(&mut self) {
        MOUNTED.store(false, Ordering::Release);
    }
}

/// Whether an optimizer is currently mounted in this process.
pub fn is_mounted() -> bool {
    MOUNTED.load(Ordering::Acquire)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OptimizerMetrics {
    pub cache: CacheMetricsSnapshot,
    pub gc: GcMetricsSnapshot,
    pub cache_len: usize,
    pub preloaded: usize,
    pub memory: Option<MemoryStats>,
}

pub struct OptimizerBuilder {
    config: OptimizerConfig,
    clock: Option<SharedClock>,
    probe: Option<SharedProbe>,
    local: Option<SharedStore>,
    session: Option<SharedStore>,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    viewport: Viewport,
}

impl OptimizerBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn probe(mut self, probe: SharedProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn local_storage(mut self, store: SharedStore) -> Self {
        self.local = Some(store);
        self
    }

    pub fn session_storage(mut self, store: SharedStore) -> Self {
        self.session = Some(store);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Validates the config, claims the mount slot and starts the background tasks.
    pub fn mount(self) -> Result<MemoryOptimizer, OptimizerError> {
        self.config.validate()?;
        let slot = MountSlot::claim()?;

        let clock = self.clock.unwrap_or_else(clock::system);
        let probe: SharedProbe = self.probe.unwrap_or_else(|| Arc::new(NoopProbe));
        let local = self.local.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let session = self.session.unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let fetcher = self.fetcher.unwrap_or_else(|| Arc::new(NoopFetcher));

        let cache: TimedCache<Value> = TimedCache::new_with_config(self.config.cache_config(), Arc::clone(&clock));
        let sweepable: Arc<dyn ExpirySweep> = Arc::new(cache.clone());
        let pruner = StoragePruner::new(local, session, self.config.retention_policy(), clock);
        let gc = Arc::new(GarbageCollector::new(
            sweepable,
            pruner,
            Arc::new(ListenerRegistry::new()),
            Arc::new(ImageRegistry::new(self.viewport)),
            self.config.gc_config(),
        ));
        let preloader =
            Arc::new(MemoryAwarePreloader::new(Arc::clone(&probe), fetcher, self.config.preload_config()));
        let monitor = MemoryMonitor::new(probe);

        let optimizer = MemoryOptimizer { config: self.config, cache, gc, preloader, monitor, slot: Some(slot) };
        optimizer.start()?;
        log::info!(
            "memory optimizer mounted: max_cache_size={} gc_interval_ms={}",
            optimizer.config.max_cache_size,
            optimizer.config.gc_interval_ms
        );
        Ok(optimizer)
    }
}

pub struct MemoryOptimizer {
    config: OptimizerConfig,
    cache: TimedCache<Value>,
    gc: Arc<GarbageCollector>,
    preloader: Arc<MemoryAwarePreloader>,
    monitor: MemoryMonitor,
    slot: Option<MountSlot>,
}

impl MemoryOptimizer {
    pub fn builder(config: OptimizerConfig) -> OptimizerBuilder {
        OptimizerBuilder {
            config,
            clock: None,
            probe: None,
            local: None,
            session: None,
            fetcher: None,
            viewport: Viewport::default(),
        }
    }

    fn start(&self) -> Result<(), OptimizerError> {
        self.gc.start()?;
        let gc: Weak<GarbageCollector> = Arc::downgrade(&self.gc);
        let preloader: Weak<MemoryAwarePreloader> = Arc::downgrade(&self.preloader);
        self.monitor.start(self.config.monitor_interval(), move |sample| {
            if let Some(gc) = gc.upgrade() {
                gc.on_heap_sample(&sample);
            }
            if let Some(p) = preloader.upgrade() {
                p.process_preload_queue();
            }
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn cache(&self) -> &TimedCache<Value> {
        &self.cache
    }

    pub fn gc(&self) -> &Arc<GarbageCollector> {
        &self.gc
    }

    pub fn images(&self) -> &Arc<ImageRegistry> {
        self.gc.images()
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        self.gc.listeners()
    }

    pub fn preloader(&self) -> &Arc<MemoryAwarePreloader> {
        &self.preloader
    }

    pub fn is_mounted(&self) -> bool {
        self.slot.is_some()
    }

    /// Last sampled heap stats, sampling now if the monitor has not ticked yet.
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        self.monitor.stats().or_else(|| self.monitor.sample_now().map(MemoryStats::from))
    }

    /// Runs a pressure sweep immediately.
    pub fn force_gc(&self) -> SweepReport {
        self.gc.run_pressure()
    }

    /// Feeds an intersection ratio for a lazily registered image, using `lazy_threshold`.
    pub fn observe_intersection(&self, id: ImageId, ratio: f64) -> bool {
        self.images().observe_intersection(id, ratio, self.config.lazy_threshold)
    }

    pub fn create_object_pool<T, F, R>(&self, factory: F, reset: R, max_pool_size: usize) -> ObjectPool<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        ObjectPool::new(factory, reset, max_pool_size)
    }

    /// Batch processor with the default inter-slice delay. Needs a tokio runtime.
    pub fn create_batch_processor<T, R, F>(
        &self,
        batch_size: usize,
        processor: F,
    ) -> Result<BatchProcessor<T, R>, OptimizerError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Vec<R> + Send + Sync + 'static,
    {
        BatchProcessor::new(batch_size, DEFAULT_BATCH_DELAY, processor)
    }

    pub fn metrics(&self) -> OptimizerMetrics {
        OptimizerMetrics {
            cache: self.cache.metrics_snapshot(),
            gc: self.gc.metrics_snapshot(),
            cache_len: self.cache.len(),
            preloaded: self.preloader.preloaded_count(),
            memory: self.monitor.stats(),
        }
    }

    /// Stops every task, restores degraded images, clears the cache and frees the mount slot.
    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(slot) = self.slot.take() else { return };
        self.monitor.stop();
        self.gc.stop();
        let restored = self.images().restore_all();
        self.cache.clear();
        drop(slot);
        log::info!("memory optimizer unmounted, {restored} images restored");
    }
}

impl Drop for MemoryOptimizer {
    fn drop(&mut self) {
        self.teardown();
    }
}
