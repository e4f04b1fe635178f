//! Bounded object pool with reset-on-release.

use parking_lot::Mutex;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

#[derive(Default)]
struct PoolMetrics {
    created: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub created: u64,
    pub reused: u64,
    pub released: u64,
    pub discarded: u64,
}

/// Free list of reusable objects. Released objects are reset before they are stored, and
/// the free list never grows past `max_pool_size`.
pub struct ObjectPool<T> {
    free: Mutex<Vec<T>>,
    factory: Factory<T>,
    reset: Reset<T>,
    max_pool_size: usize,
    metrics: PoolMetrics,
}

impl<T> ObjectPool<T> {
    pub fn new<F, R>(factory: F, reset: R, max_pool_size: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Self {
            free: Mutex::new(Vec::with_capacity(max_pool_size)),
            factory: Box::new(factory),
            reset: Box::new(reset),
            max_pool_size,
            metrics: PoolMetrics::default(),
        }
    }

    /// Pops a pooled object, or builds a fresh one.
    pub fn acquire(&self) -> T {
        // Release the lock before calling the factory.
        let pooled = self.free.lock().pop();
        match pooled {
            Some(obj) => {
                self.metrics.reused.fetch_add(1, Ordering::Relaxed);
                obj
            }
            None => {
                self.metrics.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Like [`acquire`](Self::acquire), returning the object to the pool on drop.
    pub fn acquire_guard(&self) -> Pooled<'_, T> {
        Pooled { pool: self, obj: Some(self.acquire()) }
    }

    /// Resets and stores `obj` if there is room; otherwise drops it.
    pub fn release(&self, mut obj: T) {
        let mut free = self.free.lock();
        if free.len() < self.max_pool_size {
            (self.reset)(&mut obj);
            free.push(obj);
            self.metrics.released.fetch_add(1, Ordering::Relaxed);
        } else {
            drop(free);
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        self.free.lock().clear();
    }

    /// Objects currently waiting in the free list.
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_pool_size
    }

    pub fn metrics_snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            created: self.metrics.created.load(Ordering::Relaxed),
            reused: self.metrics.reused.load(Ordering::Relaxed),
            released: self.metrics.released.load(Ordering::Relaxed),
            discarded: self.metrics.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Pooled object that goes back to its pool when dropped.
pub struct Pooled<'a, T> {
    pool: &'a ObjectPool<T>,
    obj: Option<T>,
}

impl<T> Pooled<'_, T> {
    /// Keeps the object instead of returning it to the pool.
    pub fn detach(mut self) -> T {
        match self.obj.take() {
            Some(obj) => obj,
            None => unreachable!("pooled object taken twice"),
        }
    }
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object used after detach"),
        }
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object used after detach"),
        }
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.release(obj);
        }
    }
}
