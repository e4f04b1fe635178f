use memopt::batch::{BatchProcessor, DEFAULT_BATCH_DELAY};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn results_keep_submission_order_across_calls() {
    let bp = BatchProcessor::new(4, Duration::from_millis(2), |xs: Vec<u32>| xs).unwrap();
    let first = bp.add_to_batch(0..10).expect("idle processor starts a drain");
    // Arrives while the first drain is still running.
    assert!(bp.add_to_batch(10..20).is_none());
    assert!(bp.add_to_batch(20..25).is_none());
    first.await.unwrap();
    bp.wait_idle().await;
    assert_eq!(bp.take_results(), (0..25).collect::<Vec<_>>());
    assert_eq!(bp.pending(), 0);
}

#[tokio::test]
async fn only_one_drain_runs_at_a_time() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    let bp = BatchProcessor::new(2, Duration::from_millis(1), move |xs: Vec<u8>| {
        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(1));
        a.fetch_sub(1, Ordering::SeqCst);
        xs
    })
    .unwrap();
    let mut started = 0;
    for chunk in 0..10u8 {
        if bp.add_to_batch([chunk; 3]).is_some() {
            started += 1;
        }
        tokio::task::yield_now().await;
    }
    bp.wait_idle().await;
    assert!(started >= 1);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(bp.take_results().len(), 30);
    assert!(!bp.is_processing());
}

#[tokio::test]
async fn take_results_only_returns_new_work() {
    let bp = BatchProcessor::new(8, DEFAULT_BATCH_DELAY, |xs: Vec<i32>| xs.into_iter().map(|x| -x).collect()).unwrap();
    bp.add_to_batch([1, 2]);
    bp.wait_idle().await;
    assert_eq!(bp.take_results(), vec![-1, -2]);
    bp.add_to_batch([3]);
    bp.wait_idle().await;
    assert_eq!(bp.take_results(), vec![-3]);
    assert_eq!(bp.batch_size(), 8);
}

#[tokio::test]
async fn zero_batch_size_is_clamped() {
    let bp = BatchProcessor::new(0, Duration::from_millis(1), |xs: Vec<u8>| xs).unwrap();
    bp.add_to_batch([7, 8, 9]);
    bp.wait_idle().await;
    assert_eq!(bp.batch_size(), 1);
    assert_eq!(bp.slices_processed(), 3);
    assert_eq!(bp.take_results(), vec![7, 8, 9]);
}
