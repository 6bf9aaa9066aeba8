//! Process-wide record registry shared by the four coordinators.
//!
//! # Data Flow
//! ```text
//! constraints/ → violations     (append, flip resolved once)
//! leaks/       → connections    (insert on register, delete on release)
//!              → leak_reports   (append-only)
//! migration/   → migrations     (insert, advance status)
//! webhooks/    → webhooks       (insert on first failure, update per retry)
//!
//! status() reads all five maps → ResilienceStatus
//! ```
//!
//! # Design Decisions
//! - One DashMap per record kind; no lock spans two kinds
//! - Mutation of a single key is the only synchronization unit
//! - The registry holds no business logic

use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraints::ConstraintViolation;
use crate::leaks::{ConnectionHandle, MemoryLeakReport};
use crate::migration::{MigrationRecord, MigrationStatus};
use crate::webhooks::{WebhookFailureRecord, WebhookStatus};

/// Concurrent key → record map with per-key atomic mutation.
#[derive(Debug)]
pub struct RecordMap<K: Eq + Hash, V> {
    inner: DashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V: Clone> RecordMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    /// Insert or replace.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Insert only when the key is absent. Returns false if it already existed.
    pub fn insert_new(&self, key: K, value: V) -> bool {
        match self.inner.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(value);
                true
            }
        }
    }

    pub fn delete(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Mutate one record under its shard lock.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.inner.get_mut(key).map(|mut r| f(r.value_mut()))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.iter().map(|r| r.value().clone()).collect()
    }

    pub fn count_where(&self, pred: impl Fn(&V) -> bool) -> usize {
        self.inner.iter().filter(|r| pred(r.value())).count()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for RecordMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only aggregate for dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceStatus {
    pub open_violations: usize,
    pub active_leaks: usize,
    pub running_migrations: usize,
    pub retrying_webhooks: usize,
    pub active_connections: usize,
}

/// The shared record store.
#[derive(Debug, Default)]
pub struct ResilienceRegistry {
    pub violations: RecordMap<Uuid, ConstraintViolation>,
    pub connections: RecordMap<String, Arc<ConnectionHandle>>,
    pub leak_reports: RecordMap<Uuid, MemoryLeakReport>,
    pub migrations: RecordMap<Uuid, MigrationRecord>,
    pub webhooks: RecordMap<Uuid, WebhookFailureRecord>,
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ResilienceStatus {
        ResilienceStatus {
            open_violations: self.violations.count_where(|v| !v.resolved),
            active_leaks: self.leak_reports.count_where(|r| !r.cleanup_successful),
            running_migrations: self
                .migrations
                .count_where(|m| m.status == MigrationStatus::Running),
            retrying_webhooks: self
                .webhooks
                .count_where(|w| w.status == WebhookStatus::Retrying),
            active_connections: self.connections.len(),
        }
    }
}
