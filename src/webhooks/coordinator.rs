//! Webhook retry coordinator.
//!
//! # Responsibilities
//! - Dispatch the first attempt inline and report the outcome
//! - Own one retry chain per failed webhook until it resolves or dead-letters
//! - Persist exhausted webhooks to the dead-letter sink exactly once

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::observability::metrics;
use crate::registry::ResilienceRegistry;
use crate::resilience::calculate_backoff;
use crate::store::DeadLetterSink;
use crate::webhooks::handler::WebhookHandler;
use crate::webhooks::types::{
    AttemptLog, DeadLetterEntry, HandlerError, WebhookError, WebhookEvent, WebhookFailureRecord,
    WebhookOutcome, WebhookStatus,
};

#[derive(Clone)]
pub struct WebhookRetryCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<ResilienceRegistry>,
    handler: Arc<dyn WebhookHandler>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: WebhookConfig,
    // at most one outstanding retry chain per webhook id
    timers: DashMap<Uuid, JoinHandle<()>>,
    chain_finished: Notify,
    accepting: AtomicBool,
}

impl WebhookRetryCoordinator {
    pub fn new(
        registry: Arc<ResilienceRegistry>,
        handler: Arc<dyn WebhookHandler>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                handler,
                dead_letters,
                config,
                timers: DashMap::new(),
                chain_finished: Notify::new(),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Dispatch an event, queueing retries on failure.
    ///
    /// Only input validation produces an `Err`. Delivery failures are reported through the
    /// outcome's status and handled internally from then on.
    pub async fn process_with_retry(
        &self,
        event_type: &str,
        payload: Value,
        endpoint_url: &str,
        max_attempts: Option<u32>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let max_attempts = max_attempts.unwrap_or(self.inner.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(WebhookError::InvalidMaxAttempts(max_attempts));
        }
        if event_type.trim().is_empty() {
            return Err(WebhookError::EmptyEventType);
        }
        if let Err(e) = url::Url::parse(endpoint_url) {
            return Err(WebhookError::InvalidEndpoint {
                url: endpoint_url.to_string(),
                reason: e.to_string(),
            });
        }

        let event = WebhookEvent {
            event_type: event_type.to_string(),
            payload,
            endpoint_url: endpoint_url.to_string(),
            delivery_attempt: 1,
        };

        let error = match self.inner.dispatch(&event).await {
            Ok(()) => {
                return Ok(WebhookOutcome {
                    id: Uuid::new_v4(),
                    status: WebhookStatus::Resolved,
                    attempts_made: 1,
                    next_retry: None,
                })
            }
            Err(e) => e,
        };

        let now = Utc::now();
        let mut record = WebhookFailureRecord {
            id: Uuid::new_v4(),
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            endpoint_url: event.endpoint_url.clone(),
            failure_reason: error.to_string(),
            attempts: 1,
            max_attempts,
            next_retry_at: None,
            status: WebhookStatus::Retrying,
            first_failed_at: now,
            last_attempted_at: now,
            history: vec![AttemptLog {
                attempt: 1,
                at: now,
                error: error.to_string(),
            }],
        };
        let id = record.id;

        if max_attempts <= 1 {
            record.status = WebhookStatus::DeadLetter;
            self.inner.registry.webhooks.put(id, record.clone());
            self.inner.dead_letter(&record).await;
        } else if !self.inner.accepting.load(Ordering::Acquire) {
            record.status = WebhookStatus::Failed;
            self.inner.registry.webhooks.put(id, record.clone());
            tracing::warn!(
                webhook_id = %id,
                event_type = %record.event_type,
                "Webhook failed after shutdown, no retry scheduled"
            );
        } else {
            let delay = self.inner.backoff(1);
            record.next_retry_at = retry_at(delay);
            self.inner.registry.webhooks.put(id, record.clone());
            tracing::info!(
                webhook_id = %id,
                event_type = %record.event_type,
                delay_secs = delay.as_secs(),
                error = %error,
                "Webhook failed, retry scheduled"
            );
            self.spawn_chain(id, event);
        }

        Ok(WebhookOutcome {
            id,
            status: record.status,
            attempts_made: 1,
            next_retry: record.next_retry_at,
        })
    }

    fn spawn_chain(&self, id: Uuid, event: WebhookEvent) {
        // The shard stays locked until the handle is stored, so a chain that finishes
        // at once cannot deregister before it was registered.
        match self.inner.timers.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(tokio::spawn(retry_chain(self.inner.clone(), id, event)));
            }
            Entry::Occupied(_) => {
                tracing::warn!(webhook_id = %id, "Retry chain already scheduled");
            }
        }
    }

    /// Wait until every outstanding retry chain has finished.
    ///
    /// Chains stay registered while waiting, so `shutdown` can still abort them.
    pub async fn wait_for_retries(&self) {
        loop {
            let finished = self.inner.chain_finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();
            if self.inner.timers.is_empty() {
                break;
            }
            finished.await;
        }
    }

    /// Stop scheduling retries and abort the outstanding ones.
    ///
    /// Aborted webhooks are left in status `failed`.
    pub fn shutdown(&self) -> usize {
        self.inner.accepting.store(false, Ordering::Release);

        let ids: Vec<Uuid> = self.inner.timers.iter().map(|e| *e.key()).collect();
        let mut aborted = 0;
        for id in ids {
            if let Some((_, chain)) = self.inner.timers.remove(&id) {
                chain.abort();
                aborted += 1;
            }
        }
        self.inner.chain_finished.notify_waiters();

        for record in self.inner.registry.webhooks.values() {
            if record.status != WebhookStatus::Retrying {
                continue;
            }
            self.inner.registry.webhooks.update(&record.id, |r| {
                if r.status == WebhookStatus::Retrying {
                    r.status = WebhookStatus::Failed;
                    r.next_retry_at = None;
                }
            });
        }
        if aborted > 0 {
            tracing::info!(aborted, "Outstanding webhook retries aborted");
        }
        aborted
    }

    /// Retry chains still registered.
    pub fn pending_retries(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn get_record(&self, id: Uuid) -> Option<WebhookFailureRecord> {
        self.inner.registry.webhooks.get(&id)
    }

    /// Every failure record, oldest first.
    pub fn failures(&self) -> Vec<WebhookFailureRecord> {
        let mut all = self.inner.registry.webhooks.values();
        all.sort_by_key(|r| r.first_failed_at);
        all
    }
}

impl Inner {
    fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.config.backoff_base(),
            self.config.backoff_cap(),
        )
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let result = self.handler.handle(event).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::record_webhook_attempt(&event.event_type, outcome);
        result
    }

    async fn dead_letter(&self, record: &WebhookFailureRecord) {
        metrics::record_dead_letter(&record.event_type);
        tracing::error!(
            webhook_id = %record.id,
            event_type = %record.event_type,
            attempts = record.attempts,
            reason = %record.failure_reason,
            "Webhook dead-lettered"
        );
        if let Err(e) = self.dead_letters.persist(&DeadLetterEntry::from(record)).await {
            tracing::error!(webhook_id = %record.id, error = %e, "Dead-letter persistence failed");
        }
    }
}

/// Deregisters a retry chain when it returns, is aborted or panics.
struct ChainRegistration {
    inner: Arc<Inner>,
    id: Uuid,
}

impl Drop for ChainRegistration {
    fn drop(&mut self) {
        self.inner.timers.remove(&self.id);
        self.inner.chain_finished.notify_waiters();
    }
}

fn still_retrying(inner: &Inner, id: &Uuid) -> Option<WebhookFailureRecord> {
    if !inner.accepting.load(Ordering::Acquire) {
        return None;
    }
    inner
        .registry
        .webhooks
        .get(id)
        .filter(|r| r.status == WebhookStatus::Retrying)
}

/// Sequential retries for one webhook. The next sleep starts only after the previous
/// attempt's outcome is recorded.
async fn retry_chain(inner: Arc<Inner>, id: Uuid, mut event: WebhookEvent) {
    let _registration = ChainRegistration {
        inner: inner.clone(),
        id,
    };
    loop {
        let Some(record) = still_retrying(&inner, &id) else {
            break;
        };
        tokio::time::sleep(inner.backoff(record.attempts)).await;

        // shutdown may have failed the record while this chain slept
        let Some(record) = still_retrying(&inner, &id) else {
            break;
        };
        let attempt = record.attempts + 1;
        event.delivery_attempt = attempt;
        let result = inner.dispatch(&event).await;
        let now = Utc::now();

        let updated = inner.registry.webhooks.update(&id, |r| {
            if r.status != WebhookStatus::Retrying {
                return None;
            }
            r.attempts = attempt;
            r.last_attempted_at = now;
            match &result {
                Ok(()) => {
                    r.status = WebhookStatus::Resolved;
                    r.next_retry_at = None;
                }
                Err(e) => {
                    r.failure_reason = e.to_string();
                    r.history.push(AttemptLog {
                        attempt,
                        at: now,
                        error: e.to_string(),
                    });
                    if attempt >= r.max_attempts {
                        r.status = WebhookStatus::DeadLetter;
                        r.next_retry_at = None;
                    } else {
                        r.next_retry_at = retry_at(inner.backoff(attempt));
                    }
                }
            }
            Some(r.clone())
        });
        let Some(updated) = updated.flatten() else {
            break;
        };

        match updated.status {
            WebhookStatus::Resolved => {
                tracing::info!(
                    webhook_id = %id,
                    event_type = %updated.event_type,
                    attempts = attempt,
                    "Webhook resolved on retry"
                );
                break;
            }
            WebhookStatus::DeadLetter => {
                inner.dead_letter(&updated).await;
                break;
            }
            _ => {
                tracing::info!(
                    webhook_id = %id,
                    attempt,
                    max_attempts = updated.max_attempts,
                    next_retry_at = ?updated.next_retry_at,
                    "Webhook retry failed, rescheduled"
                );
            }
        }
    }
}

fn retry_at(delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDeadLetterSink;
    use crate::webhooks::handler::handler_fn;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    const ENDPOINT: &str = "https://api.example.com/webhooks/payments";

    fn coordinator(
        handler: Arc<dyn WebhookHandler>,
    ) -> (WebhookRetryCoordinator, Arc<MemoryDeadLetterSink>) {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let c = WebhookRetryCoordinator::new(
            Arc::new(ResilienceRegistry::new()),
            handler,
            sink.clone(),
            WebhookConfig::default(),
        );
        (c, sink)
    }

    fn failing_first(n: u32, calls: Arc<AtomicU32>) -> Arc<dyn WebhookHandler> {
        handler_fn(move |_| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= n {
                    Err(HandlerError::new(format!("attempt {attempt} refused")))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let (c, _) = coordinator(failing_first(0, calls.clone()));

        let outcome = c
            .process_with_retry("payment.succeeded", json!({"id": "evt_1"}), ENDPOINT, None)
            .await
            .unwrap();

        assert_eq!(outcome.status, WebhookStatus::Resolved);
        assert_eq!(outcome.attempts_made, 1);
        assert!(outcome.next_retry.is_none());
        assert!(c.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let (c, _) = coordinator(failing_first(1, calls.clone()));

        let outcome = c
            .process_with_retry("payment.succeeded", json!({}), ENDPOINT, None)
            .await
            .unwrap();
        assert_eq!(outcome.status, WebhookStatus::Retrying);
        assert!(outcome.next_retry.is_some());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        c.wait_for_retries().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let record = c.get_record(outcome.id).unwrap();
        assert_eq!(record.status, WebhookStatus::Resolved);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_single_attempt_dead_letters_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let (c, sink) = coordinator(failing_first(u32::MAX, calls));

        let outcome = c
            .process_with_retry("payment.failed", json!({}), ENDPOINT, Some(1))
            .await
            .unwrap();

        assert_eq!(outcome.status, WebhookStatus::DeadLetter);
        assert_eq!(sink.len(), 1);
        assert_eq!(c.pending_retries(), 0);
    }

    #[tokio::test]
    async fn test_input_validation() {
        let (c, _) = coordinator(failing_first(0, Arc::new(AtomicU32::new(0))));

        assert_eq!(
            c.process_with_retry("x", json!({}), ENDPOINT, Some(0)).await,
            Err(WebhookError::InvalidMaxAttempts(0))
        );
        assert!(matches!(
            c.process_with_retry("x", json!({}), "/relative/path", None).await,
            Err(WebhookError::InvalidEndpoint { .. })
        ));
        assert_eq!(
            c.process_with_retry(" ", json!({}), ENDPOINT, None).await,
            Err(WebhookError::EmptyEventType)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_and_marks_failed() {
        let calls = Arc::new(AtomicU32::new(0));
        let (c, sink) = coordinator(failing_first(u32::MAX, calls.clone()));

        let queued = c
            .process_with_retry("payment.succeeded", json!({}), ENDPOINT, None)
            .await
            .unwrap();
        assert_eq!(c.shutdown(), 1);
        assert_eq!(c.get_record(queued.id).unwrap().status, WebhookStatus::Failed);

        let late = c
            .process_with_retry("payment.succeeded", json!({}), ENDPOINT, None)
            .await
            .unwrap();
        assert_eq!(late.status, WebhookStatus::Failed);
        assert!(late.next_retry.is_none());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(sink.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_instant_retries_deregister_their_chains() {
        let handler = handler_fn(|event| async move {
            if event.delivery_attempt == 1 {
                Err(HandlerError::new("cold cache"))
            } else {
                Ok(())
            }
        });
        let config = WebhookConfig {
            backoff_base_secs: 0,
            ..WebhookConfig::default()
        };
        let c = WebhookRetryCoordinator::new(
            Arc::new(ResilienceRegistry::new()),
            handler,
            Arc::new(MemoryDeadLetterSink::new()),
            config,
        );

        for n in 0..200 {
            c.process_with_retry("order.created", json!({ "order": n }), ENDPOINT, None)
                .await
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(10), c.wait_for_retries())
            .await
            .expect("every chain deregisters");

        assert_eq!(c.pending_retries(), 0);
        let failures = c.failures();
        assert_eq!(failures.len(), 200);
        assert!(failures.iter().all(|r| r.status == WebhookStatus::Resolved));
    }
}
