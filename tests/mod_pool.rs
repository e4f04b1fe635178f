use memopt::pool::ObjectPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Particle {
    x: f32,
    y: f32,
    resets: usize,
}

fn particle_pool(max: usize) -> ObjectPool<Particle> {
    ObjectPool::new(Particle::default, |p: &mut Particle| {
        p.x = 0.0;
        p.y = 0.0;
        p.resets += 1;
    }, max)
}

#[test]
fn acquire_prefers_pooled_objects() {
    let pool = particle_pool(4);
    let mut p = pool.acquire();
    p.x = 3.5;
    p.y = -1.0;
    pool.release(p);
    let p = pool.acquire();
    assert_eq!((p.x, p.y, p.resets), (0.0, 0.0, 1));
    let m = pool.metrics_snapshot();
    assert_eq!((m.created, m.reused), (1, 1));
}

#[test]
fn reset_runs_once_per_release() {
    let pool = particle_pool(1);
    let mut p = pool.acquire();
    for _ in 0..3 {
        pool.release(p);
        p = pool.acquire();
    }
    assert_eq!(p.resets, 3);
}

#[test]
fn overflow_objects_are_dropped_without_reset() {
    let resets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resets);
    let pool = ObjectPool::new(|| vec![0u8; 4], move |v: &mut Vec<u8>| {
        counter.fetch_add(1, Ordering::SeqCst);
        v.fill(0);
    }, 2);
    let objs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
    for o in objs {
        pool.release(o);
    }
    assert_eq!(pool.len(), 2);
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    assert_eq!(pool.metrics_snapshot().discarded, 3);
    pool.clear();
    assert!(pool.is_empty());
    assert_eq!(pool.max_size(), 2);
}

#[test]
fn pool_is_shareable_across_threads() {
    let pool = Arc::new(particle_pool(8));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let mut g = pool.acquire_guard();
                    g.x = i as f32;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert!(pool.len() <= 8);
    let m = pool.metrics_snapshot();
    assert_eq!(m.created + m.reused, 200);
}
