//! Wall-clock abstraction so expiry and retention logic can be driven deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Production clock backed by the system UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        crate::utils::num::i64_to_u64_saturating_nonnegative(chrono::Utc::now().timestamp_millis())
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    current: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self { current: Arc::new(AtomicU64::new(start_ms)) }
    }

    pub fn set(&self, ms: u64) {
        self.current.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.current.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// Shared handle used by every component that needs time.
pub type SharedClock = Arc<dyn Clock>;

#[must_use]
pub fn system() -> SharedClock {
    Arc::new(SystemClock)
}
