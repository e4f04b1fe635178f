//! Key/value storage backends and age-based pruning of timestamped JSON records.

use crate::clock::SharedClock;
use crate::errors::OptimizerError;
use crate::utils::num::duration_ms;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// String key/value store in the shape of web storage.
pub trait KeyValueStore: Send + Sync {
    fn keys(&self) -> Vec<String>;
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), OptimizerError>;
    fn remove_item(&self, key: &str) -> Result<(), OptimizerError>;

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Volatile store; the default for both local and session storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStorage {
    fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), OptimizerError> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), OptimizerError> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// Store persisted as one JSON object file, rewritten atomically on every change.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    items: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Opens `path`, creating an empty store if the file does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OptimizerError> {
        let path = path.as_ref().to_path_buf();
        let items = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| OptimizerError::Io(format!("read {}: {e}", path.display())))?;
            if raw.trim().is_empty() { BTreeMap::new() } else { serde_json::from_str(&raw)? }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, items: RwLock::new(items) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> Result<(), OptimizerError> {
        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| OptimizerError::Storage(format!("temp file in {}: {e}", dir.display())))?;
        serde_json::to_writer(&mut tmp, items)?;
        tmp.flush().map_err(|e| OptimizerError::Io(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| OptimizerError::Storage(format!("persist {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStorage {
    fn keys(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), OptimizerError> {
        let mut items = self.items.write();
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), OptimizerError> {
        let mut items = self.items.write();
        if items.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&items)
    }
}

/// How long timestamped records survive in each store.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub local_max_age: Duration,
    pub session_max_age: Duration,
    /// Only session keys with one of these prefixes are pruned.
    pub session_prefixes: Vec<String>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            local_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            session_max_age: Duration::from_secs(60 * 60),
            session_prefixes: vec!["temp_".to_string(), "cache_".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneDecision {
    Keep,
    Expired,
    Malformed,
}

/// Decides the fate of one stored value. Records without a numeric `timestamp` are kept.
#[must_use]
pub fn classify(raw: &str, now_ms: u64, max_age: Duration) -> PruneDecision {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return PruneDecision::Malformed;
    };
    match value.get("timestamp").and_then(Value::as_f64) {
        Some(ts) if now_ms as f64 - ts > duration_ms(max_age) as f64 => PruneDecision::Expired,
        _ => PruneDecision::Keep,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoragePruneReport {
    pub local_removed: usize,
    pub session_removed: usize,
    /// Included in the two counts above.
    pub malformed_removed: usize,
    pub failures: usize,
}

impl StoragePruneReport {
    #[must_use]
    pub fn removed(&self) -> usize {
        self.local_removed + self.session_removed
    }
}

/// Prunes local and session stores by record age.
pub struct StoragePruner {
    local: SharedStore,
    session: SharedStore,
    policy: RetentionPolicy,
    clock: SharedClock,
}

impl StoragePruner {
    pub fn new(local: SharedStore, session: SharedStore, policy: RetentionPolicy, clock: SharedClock) -> Self {
        Self { local, session, policy, clock }
    }

    pub fn local(&self) -> &SharedStore {
        &self.local
    }

    pub fn session(&self) -> &SharedStore {
        &self.session
    }

    pub fn prune(&self) -> StoragePruneReport {
        let now = self.clock.now_ms();
        let mut report = StoragePruneReport::default();
        let local_removed =
            prune_store(self.local.as_ref(), now, self.policy.local_max_age, |_| true, &mut report);
        let prefixes = &self.policy.session_prefixes;
        let session_removed = prune_store(
            self.session.as_ref(),
            now,
            self.policy.session_max_age,
            |k| prefixes.iter().any(|p| k.starts_with(p.as_str())),
            &mut report,
        );
        report.local_removed = local_removed;
        report.session_removed = session_removed;
        report
    }
}

fn prune_store(
    store: &dyn KeyValueStore,
    now_ms: u64,
    max_age: Duration,
    in_scope: impl Fn(&str) -> bool,
    report: &mut StoragePruneReport,
) -> usize {
    let mut removed = 0;
    for key in store.keys().into_iter().filter(|k| in_scope(k)) {
        // Gone already if another sweep got there first.
        let Some(raw) = store.get_item(&key) else { continue };
        let decision = classify(&raw, now_ms, max_age);
        if decision == PruneDecision::Keep {
            continue;
        }
        match store.remove_item(&key) {
            Ok(()) => {
                removed += 1;
                if decision == PruneDecision::Malformed {
                    report.malformed_removed += 1;
                }
            }
            Err(e) => {
                report.failures += 1;
                log::warn!("storage prune could not remove {key}: {e}");
            }
        }
    }
    removed
}
