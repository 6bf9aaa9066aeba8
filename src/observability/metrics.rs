//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_constraint_violations_total` (counter): by kind, strategy
//! - `resilience_constraint_resolutions_total` (counter): by strategy, outcome
//! - `resilience_leaks_detected_total` (counter): by component, reason
//! - `resilience_leak_cleanups_total` (counter): by outcome
//! - `resilience_active_connections` (gauge)
//! - `resilience_tracked_memory_bytes` (gauge)
//! - `resilience_migrations_total` (counter): by final status
//! - `resilience_migration_duration_seconds` (histogram)
//! - `resilience_webhook_attempts_total` (counter): by event_type, outcome
//! - `resilience_webhooks_dead_lettered_total` (counter): by event_type

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus scrape listener. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_violation(kind: &str, strategy: &str) {
    counter!(
        "resilience_constraint_violations_total",
        "kind" => kind.to_string(),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

pub fn record_resolution(strategy: &str, outcome: &'static str) {
    counter!(
        "resilience_constraint_resolutions_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_leak(component: &str, reason: &str) {
    counter!(
        "resilience_leaks_detected_total",
        "component" => component.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_leak_cleanup(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("resilience_leak_cleanups_total", "outcome" => outcome).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("resilience_active_connections").set(count as f64);
}

pub fn set_tracked_memory(bytes: u64) {
    gauge!("resilience_tracked_memory_bytes").set(bytes as f64);
}

pub fn record_migration(status: &str, elapsed: Duration) {
    counter!("resilience_migrations_total", "status" => status.to_string()).increment(1);
    histogram!("resilience_migration_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_webhook_attempt(event_type: &str, outcome: &'static str) {
    counter!(
        "resilience_webhook_attempts_total",
        "event_type" => event_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_dead_letter(event_type: &str) {
    counter!(
        "resilience_webhooks_dead_lettered_total",
        "event_type" => event_type.to_string()
    )
    .increment(1);
}
