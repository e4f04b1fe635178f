//! Cancellable repeating timer.
//!
//! Each task runs on its own named thread so sweeps work without a tokio runtime.
//! Cancelling wakes the thread immediately and joins it, which makes teardown a single call.

use crate::errors::OptimizerError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
    ticks: AtomicU64,
}

/// Handle to a background tick loop. Dropping it cancels the loop.
pub struct RepeatingTask {
    name: String,
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// Runs `tick` every `interval` until cancelled. The first tick happens after one interval.
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self, OptimizerError>
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(OptimizerError::Scheduler(format!("{name}: interval must be non-zero")));
        }
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            ticks: AtomicU64::new(0),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name(format!("memopt-{name}"))
            .spawn(move || {
                let mut next = Instant::now() + interval;
                loop {
                    {
                        let mut stopped = thread_signal.stopped.lock();
                        while !*stopped {
                            if thread_signal.wake.wait_until(&mut stopped, next).timed_out() {
                                break;
                            }
                        }
                        if *stopped {
                            return;
                        }
                    }
                    tick();
                    thread_signal.ticks.fetch_add(1, Ordering::Relaxed);
                    next += interval;
                    let now = Instant::now();
                    if next < now {
                        // Skip missed ticks rather than bursting.
                        next = now + interval;
                    }
                }
            })
            .map_err(|e| OptimizerError::Scheduler(format!("{name}: {e}")))?;
        log::debug!("started repeating task {name} every {interval:?}");
        Ok(Self { name: name.to_string(), signal, handle: Some(handle) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Completed ticks so far.
    pub fn ticks(&self) -> u64 {
        self.signal.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop and waits for an in-flight tick to finish. Idempotent.
    pub fn cancel(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                // Cancelled from inside its own tick; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                log::warn!("repeating task {} panicked", self.name);
            }
            log::debug!("stopped repeating task {}", self.name);
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_until_cancelled() {
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let mut task = RepeatingTask::spawn("t", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        task.cancel();
        let seen = count.load(Ordering::SeqCst);
        assert!(seen >= 1);
        assert!(!task.is_running());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), seen, "no ticks after cancel");
        task.cancel();
    }

    #[test]
    fn cancel_wakes_a_long_interval_promptly() {
        let mut task = RepeatingTask::spawn("slow", Duration::from_secs(3600), || {}).unwrap();
        let start = Instant::now();
        task.cancel();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(task.ticks(), 0);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            RepeatingTask::spawn("z", Duration::ZERO, || {}),
            Err(OptimizerError::Scheduler(_))
        ));
    }
}
