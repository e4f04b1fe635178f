use memopt::cache::{CacheConfig, ExpirySweep, TimedCache};
use memopt::clock::{Clock, ManualClock};
use memopt::gc::{
    BoundingBox, GarbageCollector, GcConfig, ImageRegistry, JsonFileStorage, KeyValueStore, ListenerRegistry,
    MemoryStorage, PLACEHOLDER_SRC, RetentionPolicy, StoragePruner, SweepKind, Viewport,
};
use memopt::probe::HeapUsage;
use std::sync::Arc;
use std::time::Duration;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

struct Fixture {
    clock: ManualClock,
    cache: TimedCache<String>,
    local: Arc<MemoryStorage>,
    session: Arc<MemoryStorage>,
    gc: Arc<GarbageCollector>,
}

fn fixture(config: GcConfig) -> Fixture {
    let clock = ManualClock::new(30 * DAY_MS);
    let cache = TimedCache::new_with_config(CacheConfig::default(), Arc::new(clock.clone()));
    let local = Arc::new(MemoryStorage::new());
    let session = Arc::new(MemoryStorage::new());
    let pruner = StoragePruner::new(
        local.clone(),
        session.clone(),
        RetentionPolicy::default(),
        Arc::new(clock.clone()),
    );
    let sweepable: Arc<dyn ExpirySweep> = Arc::new(cache.clone());
    let gc = Arc::new(GarbageCollector::new(
        sweepable,
        pruner,
        Arc::new(ListenerRegistry::new()),
        Arc::new(ImageRegistry::new(Viewport { height: 1000.0 })),
        config,
    ));
    Fixture { clock, cache, local, session, gc }
}

fn record(ts: u64) -> String {
    format!(r#"{{"value":"x","timestamp":{ts}}}"#)
}

#[test]
fn periodic_sweep_prunes_cache_storage_and_listeners() {
    let f = fixture(GcConfig::default());
    let now = f.clock.now_ms();
    f.cache.insert("stale", "s".into(), Duration::from_millis(5));
    f.cache.insert("fresh", "f".into(), Duration::from_secs(60));
    f.local.set_item("old", &record(now - 8 * DAY_MS)).unwrap();
    f.local.set_item("recent", &record(now - DAY_MS)).unwrap();
    f.local.set_item("broken", "{not json").unwrap();
    f.local.set_item("untimed", r#"{"theme":"dark"}"#).unwrap();
    f.session.set_item("temp_search", &record(now - 2 * HOUR_MS)).unwrap();
    f.session.set_item("cache_feed", &record(now - 10)).unwrap();
    f.session.set_item("draft", &record(now - 2 * HOUR_MS)).unwrap();
    f.gc.listeners().register("modal", "keydown");
    f.gc.listeners().register("page", "scroll");
    f.gc.listeners().mark_detached("modal");
    f.clock.advance(5);

    let report = f.gc.run_periodic();
    assert_eq!(report.kind, SweepKind::Periodic);
    assert_eq!(report.cache_expired, 1);
    assert_eq!(report.cache_remaining, 1);
    assert_eq!(report.listeners_pruned, 1);
    assert_eq!(report.storage.local_removed, 2);
    assert_eq!(report.storage.malformed_removed, 1);
    assert_eq!(report.storage.session_removed, 1);
    assert_eq!(f.local.keys(), vec!["recent".to_string(), "untimed".to_string()]);
    assert!(f.session.get_item("draft").is_some());
    assert!(f.session.get_item("cache_feed").is_some());
    assert!(f.cache.contains_key("fresh"));

    let second = f.gc.run_periodic();
    assert!(second.is_noop());
    assert_eq!(second.cache_remaining, 1);
    let m = f.gc.metrics_snapshot();
    assert_eq!((m.periodic_runs, m.cache_expired, m.storage_removed), (2, 1, 3));
}

#[test]
fn pressure_sweep_degrades_and_restores_images() {
    let f = fixture(GcConfig { pressure_threshold_bytes: 50 * 1024 * 1024, ..Default::default() });
    let images = f.gc.images();
    let near = images.register("/hero.jpg", BoundingBox::new(0.0, 400.0));
    let far = images.register("/footer.jpg", BoundingBox::new(5_000.0, 5_400.0));

    assert!(f.gc.on_heap_sample(&HeapUsage::new(50 * 1024 * 1024, 0, 100 << 20)).is_none());
    let report = f.gc.on_heap_sample(&HeapUsage::new((50 << 20) + 1, 0, 100 << 20)).unwrap();
    assert_eq!(report.kind, SweepKind::Pressure);
    assert_eq!(report.images.degraded, 1);
    assert_eq!(images.get(far).unwrap().src, PLACEHOLDER_SRC);
    assert_eq!(images.get(near).unwrap().src, "/hero.jpg");

    // Idempotent: nothing left to degrade.
    assert_eq!(f.gc.run_pressure().images.degraded, 0);

    images.update_rect(far, BoundingBox::new(600.0, 1_000.0));
    let back = f.gc.run_pressure();
    assert_eq!(back.images.restored, 1);
    assert_eq!(images.get(far).unwrap().src, "/footer.jpg");
    assert_eq!(f.gc.metrics_snapshot().pressure_runs, 3);
}

#[test]
fn background_task_sweeps_and_stops() {
    let f = fixture(GcConfig { interval: Duration::from_millis(10), ..Default::default() });
    f.gc.start().unwrap();
    f.gc.start().unwrap();
    assert!(f.gc.is_running());
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while f.gc.metrics_snapshot().periodic_runs < 2 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    f.gc.stop();
    assert!(!f.gc.is_running());
    let runs = f.gc.metrics_snapshot().periodic_runs;
    assert!(runs >= 2);
    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(f.gc.metrics_snapshot().periodic_runs, runs);
}

#[test]
fn file_storage_survives_reopen_and_prunes() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("local.json");
    let clock = ManualClock::new(10 * DAY_MS);
    {
        let store = JsonFileStorage::open(&path).unwrap();
        store.set_item("old", &record(DAY_MS)).unwrap();
        store.set_item("new", &record(9 * DAY_MS)).unwrap();
    }
    let local = Arc::new(JsonFileStorage::open(&path).unwrap());
    assert_eq!(local.len(), 2);
    let pruner = StoragePruner::new(
        local.clone(),
        Arc::new(MemoryStorage::new()),
        RetentionPolicy::default(),
        Arc::new(clock),
    );
    assert_eq!(pruner.prune().local_removed, 1);
    let reopened = JsonFileStorage::open(&path).unwrap();
    assert_eq!(reopened.keys(), vec!["new".to_string()]);
}
