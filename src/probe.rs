//! Heap-usage capability. Hosts without a heap API use [`NoopProbe`].

use crate::utils::num::percent;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// One heap sample, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

impl HeapUsage {
    #[must_use]
    pub fn new(used_bytes: u64, total_bytes: u64, limit_bytes: u64) -> Self {
        Self { used_bytes, total_bytes, limit_bytes }
    }

    /// `used / limit * 100`.
    #[must_use]
    pub fn percent(&self) -> f64 {
        percent(self.used_bytes, self.limit_bytes)
    }
}

pub trait HeapUsageProbe: Send + Sync {
    /// `None` when the host cannot report heap usage.
    fn sample(&self) -> Option<HeapUsage>;

    fn is_supported(&self) -> bool {
        true
    }
}

pub type SharedProbe = Arc<dyn HeapUsageProbe>;

/// Probe for hosts without a heap API.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProbe;

impl HeapUsageProbe for NoopProbe {
    fn sample(&self) -> Option<HeapUsage> {
        None
    }

    fn is_supported(&self) -> bool {
        false
    }
}

/// Probe fed by the host (or a test) with the latest reading.
#[derive(Debug, Default)]
pub struct ManualHeapProbe {
    current: RwLock<Option<HeapUsage>>,
}

impl ManualHeapProbe {
    #[must_use]
    pub fn new(initial: HeapUsage) -> Self {
        Self { current: RwLock::new(Some(initial)) }
    }

    pub fn set(&self, usage: HeapUsage) {
        *self.current.write() = Some(usage);
    }

    /// Updates only the used figure, keeping total and limit.
    pub fn set_used(&self, used_bytes: u64) {
        let mut g = self.current.write();
        let base = g.unwrap_or_default();
        *g = Some(HeapUsage { used_bytes, ..base });
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl HeapUsageProbe for ManualHeapProbe {
    fn sample(&self) -> Option<HeapUsage> {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_against_limit() {
        let u = HeapUsage::new(70, 80, 100);
        assert!((u.percent() - 70.0).abs() < 1e-9);
        assert_eq!(HeapUsage::default().percent(), 0.0);
    }

    #[test]
    fn manual_probe_updates() {
        let p = ManualHeapProbe::new(HeapUsage::new(1, 2, 10));
        p.set_used(5);
        assert_eq!(p.sample(), Some(HeapUsage::new(5, 2, 10)));
        p.clear();
        assert!(p.sample().is_none());
        assert!(!NoopProbe.is_supported());
    }
}
