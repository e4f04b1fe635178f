//! Periodic heap sampling.

use crate::errors::OptimizerError;
use crate::probe::{HeapUsage, SharedProbe};
use crate::schedule::RepeatingTask;
use crate::utils::num::bytes_to_mib;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Heap usage in MiB plus percentage of the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub used_mb: f64,
    pub total_mb: f64,
    pub limit_mb: f64,
    pub percentage: f64,
}

impl From<HeapUsage> for MemoryStats {
    fn from(u: HeapUsage) -> Self {
        Self {
            used_mb: bytes_to_mib(u.used_bytes),
            total_mb: bytes_to_mib(u.total_bytes),
            limit_mb: bytes_to_mib(u.limit_bytes),
            percentage: u.percent(),
        }
    }
}

pub struct MemoryMonitor {
    probe: SharedProbe,
    latest: Arc<RwLock<Option<MemoryStats>>>,
    task: Mutex<Option<RepeatingTask>>,
}

impl MemoryMonitor {
    pub fn new(probe: SharedProbe) -> Self {
        Self { probe, latest: Arc::new(RwLock::new(None)), task: Mutex::new(None) }
    }

    /// Takes one sample now, records it and returns it.
    pub fn sample_now(&self) -> Option<HeapUsage> {
        let sample = self.probe.sample();
        if let Some(u) = sample {
            *self.latest.write() = Some(MemoryStats::from(u));
        }
        sample
    }

    /// Last recorded stats; `None` until a sample succeeds or on unsupported hosts.
    pub fn stats(&self) -> Option<MemoryStats> {
        *self.latest.read()
    }

    /// Samples every `interval` and hands each successful sample to `on_sample`.
    /// Does nothing on hosts whose probe is unsupported.
    pub fn start<F>(&self, interval: Duration, on_sample: F) -> Result<(), OptimizerError>
    where
        F: Fn(HeapUsage) + Send + 'static,
    {
        if !self.probe.is_supported() {
            log::info!("heap probe unsupported, memory monitor disabled");
            return Ok(());
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        let probe = Arc::clone(&self.probe);
        let latest = Arc::clone(&self.latest);
        *task = Some(RepeatingTask::spawn("monitor", interval, move || {
            if let Some(u) = probe.sample() {
                *latest.write() = Some(MemoryStats::from(u));
                on_sample(u);
            }
        })?);
        Ok(())
    }

    pub fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(mut t) = handle {
            t.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(RepeatingTask::is_running)
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
