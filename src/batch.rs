//! FIFO batch processor that drains in fixed-size slices and yields between them.

use crate::errors::OptimizerError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Roughly one animation frame.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(16);

type Processor<T, R> = Arc<dyn Fn(Vec<T>) -> Vec<R> + Send + Sync>;

struct Inner<T, R> {
    queue: Mutex<VecDeque<T>>,
    results: Mutex<Vec<R>>,
    processing: AtomicBool,
    idle: Notify,
    slices: AtomicU64,
    processor: Processor<T, R>,
    batch_size: usize,
    delay: Duration,
}

/// Clears the processing flag if a drain ends abnormally (processor panic, task dropped).
struct DrainGuard<'a, T, R> {
    inner: &'a Inner<T, R>,
    released: bool,
}

impl<T, R> Drop for DrainGuard<'_, T, R> {
    fn drop(&mut self) {
        if !self.released {
            self.inner.processing.store(false, Ordering::Release);
        }
        self.inner.idle.notify_waiters();
    }
}

pub struct BatchProcessor<T, R> {
    inner: Arc<Inner<T, R>>,
    runtime: Handle,
}

impl<T, R> Clone for BatchProcessor<T, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), runtime: self.runtime.clone() }
    }
}

impl<T, R> BatchProcessor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Uses the ambient tokio runtime; fails outside one.
    pub fn new<F>(batch_size: usize, delay: Duration, processor: F) -> Result<Self, OptimizerError>
    where
        F: Fn(Vec<T>) -> Vec<R> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| OptimizerError::NoRuntime)?;
        Ok(Self::with_handle(runtime, batch_size, delay, processor))
    }

    pub fn with_handle<F>(runtime: Handle, batch_size: usize, delay: Duration, processor: F) -> Self
    where
        F: Fn(Vec<T>) -> Vec<R> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                results: Mutex::new(Vec::new()),
                processing: AtomicBool::new(false),
                idle: Notify::new(),
                slices: AtomicU64::new(0),
                processor: Arc::new(processor),
                batch_size: batch_size.max(1),
                delay,
            }),
            runtime,
        }
    }

    /// Queues `items`. Starts a drain and returns its handle if none was running; a drain
    /// already in progress picks the items up instead.
    pub fn add_to_batch<I>(&self, items: I) -> Option<JoinHandle<()>>
    where
        I: IntoIterator<Item = T>,
    {
        self.inner.queue.lock().extend(items);
        self.spawn_drain()
    }

    fn spawn_drain(&self) -> Option<JoinHandle<()>> {
        if self
            .inner
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let inner = Arc::clone(&self.inner);
        Some(self.runtime.spawn(drain(inner)))
    }

    /// Takes every result completed so far.
    pub fn take_results(&self) -> Vec<R> {
        std::mem::take(&mut *self.inner.results.lock())
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Items queued but not yet handed to the processor.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Slices processed since construction.
    pub fn slices_processed(&self) -> u64 {
        self.inner.slices.load(Ordering::Relaxed)
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }

    /// Waits until no drain is running and the queue is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_processing() {
                if self.pending() == 0 {
                    return;
                }
                // Items were left behind by a drain that died; restart one.
                self.spawn_drain();
                continue;
            }
            notified.await;
        }
    }
}

async fn drain<T, R>(inner: Arc<Inner<T, R>>)
where
    T: Send + 'static,
    R: Send + 'static,
{
    let mut guard = DrainGuard { inner: &inner, released: false };
    loop {
        let slice: Vec<T> = {
            let mut queue = inner.queue.lock();
            let n = inner.batch_size.min(queue.len());
            queue.drain(..n).collect()
        };
        if slice.is_empty() {
            inner.processing.store(false, Ordering::Release);
            // An add_to_batch may have landed between the empty check and the store.
            let raced = !inner.queue.lock().is_empty();
            if raced
                && inner
                    .processing
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                continue;
            }
            guard.released = true;
            break;
        }
        let len = slice.len();
        let out = (inner.processor)(slice);
        inner.results.lock().extend(out);
        inner.slices.fetch_add(1, Ordering::Relaxed);
        log::trace!("batch slice of {len} processed");
        tokio::time::sleep(inner.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_in_slices_in_order() {
        let bp = BatchProcessor::new(3, Duration::from_millis(1), |xs: Vec<u32>| {
            xs.into_iter().map(|x| x * 10).collect()
        })
        .unwrap();
        let handle = bp.add_to_batch(1..=7).expect("first call starts a drain");
        handle.await.unwrap();
        assert_eq!(bp.take_results(), vec![10, 20, 30, 40, 50, 60, 70]);
        assert_eq!(bp.slices_processed(), 3);
        assert!(bp.take_results().is_empty());
        assert!(!bp.is_processing());
    }

    #[test]
    fn construction_requires_runtime() {
        let res = BatchProcessor::new(2, DEFAULT_BATCH_DELAY, |xs: Vec<u8>| xs);
        assert!(matches!(res, Err(OptimizerError::NoRuntime)));
    }
}
