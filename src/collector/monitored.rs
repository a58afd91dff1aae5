//! Runtime registry of monitored containers.
//!
//! Tracks the configured container names plus two id caches: ids resolved to
//! a monitored name, and ids known not to match any monitored name. Event
//! dispatch hits this on every daemon event, so lookups take a read lock and
//! the write paths are short. Callers must not hold any gateway call while a
//! lock is taken; resolution happens outside and only the result is
//! published here.

use std::collections::HashSet;
use std::sync::RwLock;

/// Tri-state answer for an id lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monitored {
    /// Id is cached as monitored.
    Yes,
    /// Id is cached as blocked.
    No,
    /// Id is in neither cache; the caller must resolve its name.
    Unknown,
}

#[derive(Debug, Default)]
struct Inner {
    names: Vec<String>,
    ids: HashSet<String>,
    blocked_ids: HashSet<String>,
}

/// Concurrent registry of target names and resolved/blocked id caches.
///
/// Invariant: `ids` and `blocked_ids` are disjoint after every operation.
#[derive(Debug, Default)]
pub struct MonitoredSet {
    inner: RwLock<Inner>,
}

impl MonitoredSet {
    /// Build a set from the configured container names; duplicates ignored.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let set = Self::default();
        for name in names {
            set.push_name(name);
        }
        set
    }

    /// Append a name at startup (e.g. self-monitoring); duplicates ignored.
    pub fn push_name(&self, name: String) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.names.iter().any(|n| *n == name) {
            inner.names.push(name);
        }
    }

    /// Snapshot of the configured names in order.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.names.clone()
    }

    /// Whether `name` is a configured monitored name.
    pub fn contains(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.names.iter().any(|n| n == name)
    }

    /// Fast-path id lookup against the two caches.
    pub fn is_monitored(&self, id: &str) -> Monitored {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if inner.blocked_ids.contains(id) {
            Monitored::No
        } else if inner.ids.contains(id) {
            Monitored::Yes
        } else {
            Monitored::Unknown
        }
    }

    /// Record `id` as monitored, unblocking it if needed.
    pub fn admit(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.ids.insert(id.to_string());
        inner.blocked_ids.remove(id);
    }

    /// Record `id` as known-not-monitored. A monitored id stays monitored.
    pub fn block(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.ids.contains(id) {
            inner.blocked_ids.insert(id.to_string());
        }
    }

    /// Drop `id` from both caches (container vanished).
    pub fn forget(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.ids.remove(id);
        inner.blocked_ids.remove(id);
    }
}
