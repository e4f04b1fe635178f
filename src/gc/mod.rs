//! Garbage collector: periodic and pressure-triggered sweeps over the cache, web storage,
//! event listeners and images.

mod images;
mod listeners;
mod storage;

pub use images::{
    BoundingBox, DEGRADE_DISTANCE_VIEWPORTS, DegradeReport, ImageId, ImageRegistry, PLACEHOLDER_SRC,
    TrackedImage, Viewport,
};
pub use listeners::{ListenerId, ListenerRecord, ListenerRegistry};
pub use storage::{
    JsonFileStorage, KeyValueStore, MemoryStorage, PruneDecision, RetentionPolicy, SharedStore,
    StoragePruneReport, StoragePruner, classify,
};

use crate::cache::ExpirySweep;
use crate::errors::OptimizerError;
use crate::probe::HeapUsage;
use crate::schedule::RepeatingTask;
use crate::utils::num::usize_to_u64;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const METRICS_TARGET: &str = "memopt::metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    pub interval: Duration,
    /// A heap sample above this many used bytes triggers a pressure sweep.
    pub pressure_threshold_bytes: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { interval: Duration::from_millis(30_000), pressure_threshold_bytes: 50 * 1024 * 1024 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    #[default]
    Periodic,
    Pressure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub kind: SweepKind,
    pub cache_expired: usize,
    /// Live cache entries left after the sweep.
    pub cache_remaining: usize,
    pub listeners_pruned: usize,
    pub storage: StoragePruneReport,
    pub images: DegradeReport,
}

impl SweepReport {
    /// Whether anything changed.
    pub fn is_noop(&self) -> bool {
        self.cache_expired == 0
            && self.listeners_pruned == 0
            && self.storage.removed() == 0
            && self.images == DegradeReport::default()
    }
}

#[derive(Default)]
pub struct GcMetrics {
    pub periodic_runs: AtomicU64,
    pub pressure_runs: AtomicU64,
    pub cache_expired: AtomicU64,
    pub listeners_pruned: AtomicU64,
    pub storage_removed: AtomicU64,
    pub images_degraded: AtomicU64,
    pub images_restored: AtomicU64,
}

impl GcMetrics {
    fn record(&self, r: &SweepReport) {
        match r.kind {
            SweepKind::Periodic => self.periodic_runs.fetch_add(1, Ordering::Relaxed),
            SweepKind::Pressure => self.pressure_runs.fetch_add(1, Ordering::Relaxed),
        };
        self.cache_expired.fetch_add(usize_to_u64(r.cache_expired), Ordering::Relaxed);
        self.listeners_pruned.fetch_add(usize_to_u64(r.listeners_pruned), Ordering::Relaxed);
        self.storage_removed.fetch_add(usize_to_u64(r.storage.removed()), Ordering::Relaxed);
        self.images_degraded.fetch_add(usize_to_u64(r.images.degraded), Ordering::Relaxed);
        self.images_restored.fetch_add(usize_to_u64(r.images.restored), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GcMetricsSnapshot {
        GcMetricsSnapshot {
            periodic_runs: self.periodic_runs.load(Ordering::Relaxed),
            pressure_runs: self.pressure_runs.load(Ordering::Relaxed),
            cache_expired: self.cache_expired.load(Ordering::Relaxed),
            listeners_pruned: self.listeners_pruned.load(Ordering::Relaxed),
            storage_removed: self.storage_removed.load(Ordering::Relaxed),
            images_degraded: self.images_degraded.load(Ordering::Relaxed),
            images_restored: self.images_restored.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcMetricsSnapshot {
    pub periodic_runs: u64,
    pub pressure_runs: u64,
    pub cache_expired: u64,
    pub listeners_pruned: u64,
    pub storage_removed: u64,
    pub images_degraded: u64,
    pub images_restored: u64,
}

pub struct GarbageCollector {
    cache: Arc<dyn ExpirySweep>,
    storage: StoragePruner,
    listeners: Arc<ListenerRegistry>,
    images: Arc<ImageRegistry>,
    config: GcConfig,
    metrics: GcMetrics,
    // Sweeps touch shared storage and images; never run two at once.
    sweep_lock: Mutex<()>,
    task: Mutex<Option<RepeatingTask>>,
}

impl GarbageCollector {
    pub fn new(
        cache: Arc<dyn ExpirySweep>,
        storage: StoragePruner,
        listeners: Arc<ListenerRegistry>,
        images: Arc<ImageRegistry>,
        config: GcConfig,
    ) -> Self {
        Self {
            cache,
            storage,
            listeners,
            images,
            config,
            metrics: GcMetrics::default(),
            sweep_lock: Mutex::new(()),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> GcConfig {
        self.config
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn images(&self) -> &Arc<ImageRegistry> {
        &self.images
    }

    pub fn storage(&self) -> &StoragePruner {
        &self.storage
    }

    /// Expired cache entries, stale listeners, aged storage records.
    pub fn run_periodic(&self) -> SweepReport {
        let _guard = self.sweep_lock.lock();
        self.finish(self.base_sweep(SweepKind::Periodic))
    }

    /// Everything in a periodic sweep, plus image degradation.
    pub fn run_pressure(&self) -> SweepReport {
        let _guard = self.sweep_lock.lock();
        let mut report = self.base_sweep(SweepKind::Pressure);
        report.images = self.images.degrade_offscreen();
        self.finish(report)
    }

    /// Runs a pressure sweep when `sample` is over the pressure threshold.
    pub fn on_heap_sample(&self, sample: &HeapUsage) -> Option<SweepReport> {
        if sample.used_bytes > self.config.pressure_threshold_bytes {
            log::info!(
                "heap at {} bytes exceeds {} byte threshold, sweeping",
                sample.used_bytes,
                self.config.pressure_threshold_bytes
            );
            Some(self.run_pressure())
        } else {
            None
        }
    }

    fn base_sweep(&self, kind: SweepKind) -> SweepReport {
        let cache_expired = self.cache.sweep_expired();
        SweepReport {
            kind,
            cache_expired,
            cache_remaining: self.cache.len(),
            listeners_pruned: self.listeners.prune(),
            storage: self.storage.prune(),
            images: DegradeReport::default(),
        }
    }

    fn finish(&self, report: SweepReport) -> SweepReport {
        self.metrics.record(&report);
        if !report.is_noop() {
            log::info!(
                target: METRICS_TARGET,
                "gc {:?}: cache={} (left {}) listeners={} storage={} degraded={} restored={}",
                report.kind,
                report.cache_expired,
                report.cache_remaining,
                report.listeners_pruned,
                report.storage.removed(),
                report.images.degraded,
                report.images.restored
            );
        }
        crate::dev_event!(
            "gc",
            "sweep",
            pressure = (report.kind == SweepKind::Pressure),
            cache = report.cache_expired,
            storage = report.storage.removed()
        );
        report
    }

    /// Starts the periodic sweep. Calling it while running is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), OptimizerError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *task = Some(RepeatingTask::spawn("gc", self.config.interval, move || {
            if let Some(gc) = weak.upgrade() {
                gc.run_periodic();
            }
        })?);
        log::info!("garbage collector started, interval {:?}", self.config.interval);
        Ok(())
    }

    pub fn stop(&self) {
        // Take the handle first so a tick that is mid-sweep cannot deadlock on `task`.
        let handle = self.task.lock().take();
        if let Some(mut t) = handle {
            t.cancel();
            log::info!("garbage collector stopped after {} ticks", t.ticks());
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(RepeatingTask::is_running)
    }

    pub fn metrics_snapshot(&self) -> GcMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}
