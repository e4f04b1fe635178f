use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

pub type ListenerId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerRecord {
    pub target: String,
    pub event: String,
}

/// Bookkeeping of event listeners by target, so listeners on detached targets can be dropped.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<ListenerId, ListenerRecord>>,
    detached: RwLock<HashSet<String>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering on a target marks it attached again.
    pub fn register(&self, target: &str, event: &str) -> ListenerId {
        self.detached.write().remove(target);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .insert(id, ListenerRecord { target: target.to_string(), event: event.to_string() });
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    pub fn mark_detached(&self, target: &str) {
        self.detached.write().insert(target.to_string());
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn count_for(&self, target: &str) -> usize {
        self.listeners.read().values().filter(|r| r.target == target).count()
    }

    /// Drops every listener whose target is detached. Returns number removed.
    pub fn prune(&self) -> usize {
        let detached: HashSet<String> = std::mem::take(&mut *self.detached.write());
        if detached.is_empty() {
            return 0;
        }
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|_, r| !detached.contains(&r.target));
        before - listeners.len()
    }
}
