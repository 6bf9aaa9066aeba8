//! Webhook retry scheduling and dead-lettering, driven on a paused clock.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilience_coordinator::config::CoordinatorConfig;
use resilience_coordinator::store::JsonlDeadLetterSink;
use resilience_coordinator::webhooks::{
    handler_fn, HandlerError, WebhookError, WebhookRouter, WebhookStatus,
};
use resilience_coordinator::ResilienceCoordinator;
use serde_json::json;
use tokio::time::Instant;

const ENDPOINT: &str = "https://api.example.com/webhooks/payment";

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_dead_letter_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, sink) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(u32::MAX, calls.clone()),
    );
    let webhooks = coordinator.webhooks();

    let outcome = webhooks
        .process_with_retry("payment.failed", json!({ "id": "evt_1" }), ENDPOINT, Some(3))
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookStatus::Retrying);
    assert_eq!(outcome.attempts_made, 1);
    assert!(outcome.next_retry.is_some());
    assert_eq!(coordinator.status().retrying_webhooks, 1);

    webhooks.wait_for_retries().await;

    let record = webhooks.get_record(outcome.id).unwrap();
    assert_eq!(record.status, WebhookStatus::DeadLetter);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.history.len(), 3);
    assert!(record.next_retry_at.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].webhook_id, outcome.id);
    assert_eq!(entries[0].attempts, 3);
    assert_eq!(entries[0].payload, json!({ "id": "evt_1" }));
    assert_eq!(coordinator.status().retrying_webhooks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_resolves_on_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, sink) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(1, calls.clone()),
    );
    let webhooks = coordinator.webhooks();

    let outcome = webhooks
        .process_with_retry("payment.succeeded", json!({}), ENDPOINT, None)
        .await
        .unwrap();
    webhooks.wait_for_retries().await;

    let record = webhooks.get_record(outcome.id).unwrap();
    assert_eq!(record.status, WebhookStatus::Resolved);
    assert_eq!(record.attempts, 2);
    assert_eq!(record.max_attempts, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_success_leaves_no_record() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, _) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(0, calls.clone()),
    );

    let outcome = coordinator
        .webhooks()
        .process_with_retry("payment.succeeded", json!({}), ENDPOINT, None)
        .await
        .unwrap();

    assert_eq!(outcome.status, WebhookStatus::Resolved);
    assert_eq!(outcome.attempts_made, 1);
    assert!(coordinator.webhooks().get_record(outcome.id).is_none());
    assert!(coordinator.webhooks().failures().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_up_to_sixteen_minutes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let seen = seen.clone();
        handler_fn(move |_event| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(Instant::now());
                Err(HandlerError::new("503 Service Unavailable"))
            }
        })
    };
    let (coordinator, sink) = common::coordinator_with_handler(CoordinatorConfig::default(), handler);

    coordinator
        .webhooks()
        .process_with_retry("invoice.created", json!({}), ENDPOINT, Some(7))
        .await
        .unwrap();
    coordinator.webhooks().wait_for_retries().await;

    let seen = seen.lock().unwrap();
    let gaps_minutes: Vec<u64> = seen
        .windows(2)
        .map(|w| (w[1] - w[0]).as_secs() / 60)
        .collect();
    assert_eq!(gaps_minutes, vec![1, 2, 4, 8, 16, 16]);
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_dead_letters_immediately() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, sink) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(u32::MAX, calls.clone()),
    );

    let outcome = coordinator
        .webhooks()
        .process_with_retry("payment.failed", json!({}), ENDPOINT, Some(1))
        .await
        .unwrap();

    assert_eq!(outcome.status, WebhookStatus::DeadLetter);
    assert!(outcome.next_retry.is_none());
    assert_eq!(coordinator.webhooks().pending_retries(), 0);
    assert_eq!(sink.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dead_letters_append_to_jsonl_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path());
    let path = config.webhooks.dead_letter_path.clone();
    let coordinator = ResilienceCoordinator::builder(config)
        .webhook_handler(common::flaky_handler(u32::MAX, Arc::new(AtomicU32::new(0))))
        .build();

    for n in 0..2 {
        coordinator
            .webhooks()
            .process_with_retry("order.shipped", json!({ "order": n }), ENDPOINT, Some(2))
            .await
            .unwrap();
    }
    coordinator.webhooks().wait_for_retries().await;

    let entries = JsonlDeadLetterSink::new(path).read_all().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.attempts == 2 && e.history.len() == 2));
    assert!(entries.iter().any(|e| e.payload == json!({ "order": 1 })));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_pending_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, sink) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(u32::MAX, calls.clone()),
    );
    let webhooks = coordinator.webhooks();

    let outcome = webhooks
        .process_with_retry("payment.failed", json!({}), ENDPOINT, None)
        .await
        .unwrap();
    assert_eq!(webhooks.pending_retries(), 1);

    assert_eq!(webhooks.shutdown(), 1);
    tokio::time::sleep(Duration::from_secs(3_600)).await;

    let record = webhooks.get_record(outcome.id).unwrap();
    assert_eq!(record.status, WebhookStatus::Failed);
    assert!(record.next_retry_at.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sink.is_empty());

    let late = webhooks
        .process_with_retry("payment.failed", json!({}), ENDPOINT, None)
        .await
        .unwrap();
    assert_eq!(late.status, WebhookStatus::Failed);
    assert_eq!(webhooks.pending_retries(), 0);
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_dispatch() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, _) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(0, calls.clone()),
    );
    let webhooks = coordinator.webhooks();

    assert_eq!(
        webhooks
            .process_with_retry("payment.failed", json!({}), ENDPOINT, Some(0))
            .await
            .unwrap_err(),
        WebhookError::InvalidMaxAttempts(0)
    );
    assert_eq!(
        webhooks
            .process_with_retry("  ", json!({}), ENDPOINT, None)
            .await
            .unwrap_err(),
        WebhookError::EmptyEventType
    );
    assert!(matches!(
        webhooks
            .process_with_retry("payment.failed", json!({}), "not a url", None)
            .await
            .unwrap_err(),
        WebhookError::InvalidEndpoint { .. }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_router_sends_events_to_matching_handler() {
    let payments = Arc::new(AtomicU32::new(0));
    let other = Arc::new(AtomicU32::new(0));
    let router = WebhookRouter::new()
        .route("payment.*", common::flaky_handler(0, payments.clone()))
        .fallback(common::flaky_handler(u32::MAX, other.clone()));
    let (coordinator, sink) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        Arc::new(router),
    );
    let webhooks = coordinator.webhooks();

    let paid = webhooks
        .process_with_retry("payment.captured", json!({}), ENDPOINT, None)
        .await
        .unwrap();
    let unknown = webhooks
        .process_with_retry("customer.deleted", json!({}), ENDPOINT, Some(2))
        .await
        .unwrap();
    webhooks.wait_for_retries().await;

    assert_eq!(paid.status, WebhookStatus::Resolved);
    assert_eq!(payments.load(Ordering::SeqCst), 1);
    assert_eq!(other.load(Ordering::SeqCst), 2);
    assert_eq!(
        webhooks.get_record(unknown.id).unwrap().status,
        WebhookStatus::DeadLetter
    );
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_retries_someone_is_waiting_on() {
    let calls = Arc::new(AtomicU32::new(0));
    let (coordinator, sink) = common::coordinator_with_handler(
        CoordinatorConfig::default(),
        common::flaky_handler(u32::MAX, calls.clone()),
    );
    let webhooks = coordinator.webhooks();

    let outcome = webhooks
        .process_with_retry("payment.failed", json!({}), ENDPOINT, None)
        .await
        .unwrap();

    let waiter = webhooks.wait_for_retries();
    tokio::pin!(waiter);
    tokio::select! {
        _ = &mut waiter => panic!("retry chain finished before its first backoff"),
        _ = tokio::time::sleep(Duration::from_secs(10)) => {}
    }

    assert_eq!(webhooks.shutdown(), 1);
    waiter.await;
    tokio::time::sleep(Duration::from_secs(3_600)).await;

    let record = webhooks.get_record(outcome.id).unwrap();
    assert_eq!(record.status, WebhookStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sink.is_empty());
    assert_eq!(webhooks.pending_retries(), 0);
}
