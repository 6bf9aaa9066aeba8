//! Connection handles, leak reports and errors.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Kind of long-lived resource being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Socket,
    Subscription,
    Interval,
    Listener,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Socket => "socket",
            ConnectionKind::Subscription => "subscription",
            ConnectionKind::Interval => "interval",
            ConnectionKind::Listener => "listener",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory instrumentation exposed by a tracked resource.
pub trait LeakProbe: Send + Sync {
    /// Current estimate of bytes retained by the resource.
    fn memory_bytes(&self) -> u64;
}

/// Probe for resources whose footprint is known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFootprint(pub u64);

impl LeakProbe for FixedFootprint {
    fn memory_bytes(&self) -> u64 {
        self.0
    }
}

impl<T: LeakProbe + ?Sized> LeakProbe for Arc<T> {
    fn memory_bytes(&self) -> u64 {
        (**self).memory_bytes()
    }
}

/// Release callback. Invoked at most once.
pub type ReleaseFn = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// What a registration's setup step produces: the live resource and how to release it.
pub struct Tracked<R> {
    pub resource: R,
    pub release: ReleaseFn,
}

impl<R> Tracked<R> {
    pub fn new<F>(resource: R, release: F) -> Self
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        Self {
            resource,
            release: Box::new(release),
        }
    }
}

/// Registry entry for a live resource.
///
/// The `claimed` flag is set with a compare-and-swap before the release callback runs,
/// so exactly one of manual release and leak cleanup gets to invoke it.
pub struct ConnectionHandle {
    pub id: String,
    pub kind: ConnectionKind,
    pub component: String,
    pub created_at: DateTime<Utc>,
    started: Instant,
    probe: Arc<dyn LeakProbe>,
    claimed: AtomicBool,
    release: Mutex<Option<ReleaseFn>>,
    sampler: Mutex<Option<AbortHandle>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: String,
        kind: ConnectionKind,
        component: String,
        probe: Arc<dyn LeakProbe>,
        release: ReleaseFn,
    ) -> Self {
        Self {
            id,
            kind,
            component,
            created_at: Utc::now(),
            started: Instant::now(),
            probe,
            claimed: AtomicBool::new(false),
            release: Mutex::new(Some(release)),
            sampler: Mutex::new(None),
        }
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.probe.memory_bytes()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Take the release callback. Only the first caller gets it.
    pub(crate) fn claim(&self) -> Option<ReleaseFn> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.release
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub(crate) fn set_sampler(&self, handle: AbortHandle) {
        let mut slot = self.sampler.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_claimed() {
            handle.abort();
        } else {
            *slot = Some(handle);
        }
    }

    pub(crate) fn cancel_sampler(&self) {
        if let Some(handle) = self
            .sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("component", &self.component)
            .field("created_at", &self.created_at)
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// Caller's view of a registered resource.
#[derive(Debug)]
pub struct ConnectionLease<R> {
    pub id: String,
    resource: Arc<R>,
}

impl<R> ConnectionLease<R> {
    pub(crate) fn new(id: String, resource: Arc<R>) -> Self {
        Self { id, resource }
    }

    pub fn resource(&self) -> Arc<R> {
        self.resource.clone()
    }
}

impl<R> Deref for ConnectionLease<R> {
    type Target = R;
    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

/// Snapshot of an active connection for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub kind: ConnectionKind,
    pub component: String,
    pub created_at: DateTime<Utc>,
    pub memory_bytes: u64,
    pub age_secs: u64,
}

impl From<&ConnectionHandle> for ConnectionSummary {
    fn from(h: &ConnectionHandle) -> Self {
        Self {
            id: h.id.clone(),
            kind: h.kind,
            component: h.component.clone(),
            created_at: h.created_at,
            memory_bytes: h.memory_bytes(),
            age_secs: h.age().as_secs(),
        }
    }
}

/// Why a connection was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakReason {
    MemoryThreshold,
    MaxAge,
}

impl LeakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeakReason::MemoryThreshold => "memory_threshold",
            LeakReason::MaxAge => "max_age",
        }
    }
}

/// Append-only audit record of one leak detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLeakReport {
    pub id: Uuid,
    pub connection_id: String,
    pub component: String,
    pub kind: ConnectionKind,
    pub memory_bytes: u64,
    pub age_minutes: u64,
    pub reason: LeakReason,
    pub cleanup_attempted: bool,
    pub cleanup_successful: bool,
    pub detected_at: DateTime<Utc>,
}

/// Result of a release request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The callback ran and succeeded.
    Released,
    /// The callback ran and reported an error.
    ReleaseFailed(String),
    /// Another path already claimed the callback.
    AlreadyReleased,
    /// No active connection has this id.
    NotFound,
}

/// Aggregate figures from one global sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub active_connections: usize,
    pub total_memory_bytes: u64,
    /// Connections currently above a per-connection limit.
    pub leaking: usize,
    pub over_budget: bool,
}

#[derive(Debug, Error)]
pub enum LeakError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(String),

    #[error("setup for connection {id} failed: {reason}")]
    Setup { id: String, reason: String },
}
