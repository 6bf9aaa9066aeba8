//! Shared fixtures for integration tests.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use resilience_coordinator::config::CoordinatorConfig;
use resilience_coordinator::store::{MemoryDeadLetterSink, MemoryStore, TableSchema};
use resilience_coordinator::webhooks::{handler_fn, HandlerError, WebhookHandler};
use resilience_coordinator::ResilienceCoordinator;
use serde_json::{json, Value};

/// Default config with every on-disk path pointed into `dir`.
#[allow(dead_code)]
pub fn config_in(dir: &Path) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.migrations.backup_dir = dir.join("backups");
    config.webhooks.dead_letter_path = dir.join("dead-letters.jsonl");
    config.admin.enabled = true;
    config.admin.api_key = "test-admin-key".to_string();
    config
}

/// Store with a `users` table and a `bookings` table that references it.
#[allow(dead_code)]
pub fn booking_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    seed(&store);
    Arc::new(store)
}

#[allow(dead_code)]
pub fn seed(store: &MemoryStore) {
    store
        .create_table(
            TableSchema::new("users")
                .unique("id")
                .unique("email")
                .not_null("email"),
        )
        .unwrap();
    store
        .create_table(
            TableSchema::new("bookings")
                .not_null("user_id")
                .not_null("status")
                .references("user_id", "users", "id")
                .check("bookings_price_positive", "price", |v| {
                    v.as_f64().map_or(true, |p| p > 0.0)
                }),
        )
        .unwrap();
}

#[allow(dead_code)]
pub fn user(id: u64, email: &str) -> Value {
    json!({ "id": id, "email": email })
}

/// Handler that fails the first `failures` calls, then succeeds. Counts every call.
#[allow(dead_code)]
pub fn flaky_handler(failures: u32, calls: Arc<AtomicU32>) -> Arc<dyn WebhookHandler> {
    handler_fn(move |_event| {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(HandlerError::new(format!("downstream unavailable (call {n})")))
            } else {
                Ok(())
            }
        }
    })
}

/// Coordinator with an in-memory dead-letter sink and the given handler.
#[allow(dead_code)]
pub fn coordinator_with_handler(
    config: CoordinatorConfig,
    handler: Arc<dyn WebhookHandler>,
) -> (ResilienceCoordinator, Arc<MemoryDeadLetterSink>) {
    let sink = Arc::new(MemoryDeadLetterSink::new());
    let coordinator = ResilienceCoordinator::builder(config)
        .store(booking_store())
        .dead_letters(sink.clone())
        .webhook_handler(handler)
        .build();
    (coordinator, sink)
}

/// Collect an axum response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
