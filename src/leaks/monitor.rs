//! Connection leak monitor.
//!
//! # Responsibilities
//! - Track long-lived resources and their release callbacks
//! - Sample each resource on its own timer and clean up leaks
//! - Sweep aggregate memory for alerting

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::config::LeakConfig;
use crate::leaks::types::{
    ConnectionHandle, ConnectionKind, ConnectionLease, ConnectionSummary, LeakError, LeakProbe,
    LeakReason, MemoryLeakReport, ReleaseOutcome, SweepSummary, Tracked,
};
use crate::observability::metrics;
use crate::registry::ResilienceRegistry;
use crate::store::{Alert, AlertLevel, Notifier};

#[derive(Clone)]
pub struct ConnectionLeakMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    registry: Arc<ResilienceRegistry>,
    config: LeakConfig,
    notifier: Arc<dyn Notifier>,
}

impl ConnectionLeakMonitor {
    pub fn new(
        registry: Arc<ResilienceRegistry>,
        config: LeakConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                registry,
                config,
                notifier,
            }),
        }
    }

    /// Set up a resource and start watching it.
    ///
    /// `setup` runs once. A duplicate id is rejected before `setup` is called; if a
    /// concurrent registration wins the id after setup, the new resource is released
    /// immediately.
    pub async fn register<R, E, F, Fut>(
        &self,
        id: impl Into<String>,
        kind: ConnectionKind,
        component: &str,
        setup: F,
    ) -> Result<ConnectionLease<R>, LeakError>
    where
        R: LeakProbe + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Tracked<R>, E>>,
    {
        let id = id.into();
        let registry = &self.inner.registry;
        if registry.connections.contains(&id) {
            return Err(LeakError::DuplicateConnection(id));
        }

        let tracked = setup().await.map_err(|e| LeakError::Setup {
            id: id.clone(),
            reason: e.to_string(),
        })?;

        let resource = Arc::new(tracked.resource);
        let handle = Arc::new(ConnectionHandle::new(
            id.clone(),
            kind,
            component.to_string(),
            resource.clone(),
            tracked.release,
        ));

        if !registry.connections.insert_new(id.clone(), handle.clone()) {
            if let Some(release) = handle.claim() {
                if let Err(e) = release() {
                    tracing::warn!(connection_id = %id, error = %e, "Releasing duplicate resource failed");
                }
            }
            return Err(LeakError::DuplicateConnection(id));
        }

        let sampler = tokio::spawn(run_sampler(self.inner.clone(), handle.clone()));
        handle.set_sampler(sampler.abort_handle());
        metrics::set_active_connections(registry.connections.len());

        tracing::debug!(
            connection_id = %id,
            kind = %kind,
            component = %component,
            "Connection registered"
        );

        Ok(ConnectionLease::new(id, resource))
    }

    /// Release a connection. Safe to call repeatedly and concurrently with leak cleanup.
    pub fn release(&self, id: &str) -> ReleaseOutcome {
        let registry = &self.inner.registry;
        let Some(handle) = registry.connections.get(&id.to_string()) else {
            return ReleaseOutcome::NotFound;
        };
        let Some(release) = handle.claim() else {
            return ReleaseOutcome::AlreadyReleased;
        };

        handle.cancel_sampler();
        let result = release();
        registry.connections.delete(&handle.id);
        metrics::set_active_connections(registry.connections.len());

        // audit the final state even though the caller released it in time
        if let Some(reason) = self.inner.leak_reason(&handle) {
            self.inner.report(&handle, reason, result.is_ok());
        }

        match result {
            Ok(()) => {
                tracing::debug!(connection_id = %id, "Connection released");
                ReleaseOutcome::Released
            }
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Release callback failed");
                ReleaseOutcome::ReleaseFailed(e)
            }
        }
    }

    /// Run the sampling check for one connection now.
    pub fn check_connection(&self, id: &str) -> Option<MemoryLeakReport> {
        let handle = self.inner.registry.connections.get(&id.to_string())?;
        self.inner.sample(&handle)
    }

    /// Measure aggregate memory across active connections. Never cleans anything up.
    pub fn sweep_once(&self) -> SweepSummary {
        let inner = &self.inner;
        let handles = inner.registry.connections.values();

        let total_memory_bytes: u64 = handles.iter().map(|h| h.memory_bytes()).sum();
        let leaking = handles
            .iter()
            .filter(|h| inner.leak_reason(h).is_some())
            .count();
        let over_budget = total_memory_bytes > inner.config.aggregate_alert_bytes;

        metrics::set_active_connections(handles.len());
        metrics::set_tracked_memory(total_memory_bytes);

        let summary = SweepSummary {
            active_connections: handles.len(),
            total_memory_bytes,
            leaking,
            over_budget,
        };

        if over_budget {
            tracing::warn!(
                total_memory_bytes,
                limit = inner.config.aggregate_alert_bytes,
                connections = summary.active_connections,
                "Aggregate connection memory above alert limit"
            );
            inner.alert(Alert::new(
                AlertLevel::Warning,
                "leak-monitor",
                "Connection memory high",
                format!(
                    "{} active connections hold {} bytes (limit {})",
                    summary.active_connections,
                    total_memory_bytes,
                    inner.config.aggregate_alert_bytes
                ),
            ));
        } else {
            tracing::debug!(
                total_memory_bytes,
                connections = summary.active_connections,
                "Leak sweep complete"
            );
        }

        summary
    }

    /// Periodic global sweep until shutdown.
    pub async fn run_sweeper(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.inner.config.sweep_interval();
        tracing::info!(interval_secs = period.as_secs(), "Leak sweeper starting");

        let mut ticker = time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Leak sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Release every active connection.
    pub fn release_all(&self) -> usize {
        self.inner
            .registry
            .connections
            .values()
            .iter()
            .filter(|h| {
                matches!(
                    self.release(&h.id),
                    ReleaseOutcome::Released | ReleaseOutcome::ReleaseFailed(_)
                )
            })
            .count()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.registry.connections.contains(&id.to_string())
    }

    pub fn active_connections(&self) -> Vec<ConnectionSummary> {
        let mut list: Vec<ConnectionSummary> = self
            .inner
            .registry
            .connections
            .values()
            .iter()
            .map(|h| ConnectionSummary::from(h.as_ref()))
            .collect();
        list.sort_by_key(|c| c.created_at);
        list
    }

    /// Every leak report, oldest first.
    pub fn reports(&self) -> Vec<MemoryLeakReport> {
        let mut reports = self.inner.registry.leak_reports.values();
        reports.sort_by_key(|r| r.detected_at);
        reports
    }

    /// Reports whose cleanup did not succeed.
    pub fn active_leaks(&self) -> Vec<MemoryLeakReport> {
        self.reports()
            .into_iter()
            .filter(|r| !r.cleanup_successful)
            .collect()
    }
}

impl MonitorInner {
    fn leak_reason(&self, handle: &ConnectionHandle) -> Option<LeakReason> {
        if handle.memory_bytes() > self.config.memory_threshold_bytes {
            Some(LeakReason::MemoryThreshold)
        } else if handle.age() > self.config.max_age() {
            Some(LeakReason::MaxAge)
        } else {
            None
        }
    }

    /// One sampling pass. Cleans up and reports when the connection looks leaked.
    fn sample(&self, handle: &ConnectionHandle) -> Option<MemoryLeakReport> {
        let reason = self.leak_reason(handle)?;

        tracing::warn!(
            connection_id = %handle.id,
            component = %handle.component,
            reason = reason.as_str(),
            memory_bytes = handle.memory_bytes(),
            age_secs = handle.age().as_secs(),
            "Connection leak detected"
        );
        metrics::record_leak(&handle.component, reason.as_str());

        // a concurrent release already owns the callback
        let release = handle.claim()?;
        handle.cancel_sampler();
        let result = release();
        self.registry.connections.delete(&handle.id);
        metrics::set_active_connections(self.registry.connections.len());

        if let Err(e) = &result {
            tracing::error!(connection_id = %handle.id, error = %e, "Leak cleanup failed");
        }

        Some(self.report(handle, reason, result.is_ok()))
    }

    /// Record a cleanup that was attempted, by the sampler or by a late release.
    fn report(
        &self,
        handle: &ConnectionHandle,
        reason: LeakReason,
        cleanup_successful: bool,
    ) -> MemoryLeakReport {
        let report = MemoryLeakReport {
            id: Uuid::new_v4(),
            connection_id: handle.id.clone(),
            component: handle.component.clone(),
            kind: handle.kind,
            memory_bytes: handle.memory_bytes(),
            age_minutes: handle.age().as_secs() / 60,
            reason,
            cleanup_attempted: true,
            cleanup_successful,
            detected_at: Utc::now(),
        };
        self.registry.leak_reports.put(report.id, report.clone());
        metrics::record_leak_cleanup(cleanup_successful);

        if !cleanup_successful {
            self.alert(Alert::new(
                AlertLevel::Critical,
                "leak-monitor",
                "Leak cleanup failed",
                format!(
                    "connection {} of {} could not be released",
                    handle.id, handle.component
                ),
            ));
        }
        report
    }

    /// Fire-and-forget alert delivery.
    fn alert(&self, alert: Alert) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(title = %alert.title, "No runtime available to deliver alert");
            return;
        };
        let notifier = self.notifier.clone();
        runtime.spawn(async move {
            if let Err(e) = notifier.notify(&alert).await {
                tracing::warn!(title = %alert.title, error = %e, "Alert delivery failed");
            }
        });
    }
}

async fn run_sampler(inner: Arc<MonitorInner>, handle: Arc<ConnectionHandle>) {
    let period = inner.config.sample_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if handle.is_claimed() {
            break;
        }
        if inner.sample(&handle).is_some() || handle.is_claimed() {
            break;
        }
    }
}
