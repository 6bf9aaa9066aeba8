//! Event handlers and the dispatch table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::webhooks::types::{HandlerError, WebhookEvent};

/// Processes one event type. Implementations should be idempotent: the upstream
/// source may redeliver an event this coordinator already handled.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError>;
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> WebhookHandler for FnHandler<F>
where
    F: Fn(WebhookEvent) -> BoxFuture + Send + Sync,
{
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn WebhookHandler>
where
    F: Fn(WebhookEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(move |event| -> BoxFuture { Box::pin(f(event)) }))
}

/// Fallback for event types nobody registered. Logs and accepts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl WebhookHandler for LoggingHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        tracing::info!(
            event_type = %event.event_type,
            endpoint = %event.endpoint_url,
            "No handler registered, event acknowledged"
        );
        Ok(())
    }
}

/// Dispatch table keyed by event type.
///
/// Lookup order: exact type, then the longest `prefix.*` pattern, then the fallback.
#[derive(Clone)]
pub struct WebhookRouter {
    routes: HashMap<String, Arc<dyn WebhookHandler>>,
    fallback: Arc<dyn WebhookHandler>,
}

impl WebhookRouter {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            fallback: Arc::new(LoggingHandler),
        }
    }

    pub fn route(mut self, event_type: impl Into<String>, handler: Arc<dyn WebhookHandler>) -> Self {
        self.routes.insert(event_type.into(), handler);
        self
    }

    pub fn fallback(mut self, handler: Arc<dyn WebhookHandler>) -> Self {
        self.fallback = handler;
        self
    }

    pub fn handler_for(&self, event_type: &str) -> Arc<dyn WebhookHandler> {
        if let Some(h) = self.routes.get(event_type) {
            return h.clone();
        }
        self.routes
            .iter()
            .filter_map(|(pattern, h)| {
                let prefix = pattern.strip_suffix(".*")?;
                let rest = event_type.strip_prefix(prefix)?;
                rest.starts_with('.').then_some((prefix.len(), h))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, h)| h.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.routes.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for WebhookRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookHandler for WebhookRouter {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        self.handler_for(&event.event_type).handle(event).await
    }
}

/// Keys remembered by [`IdempotentHandler::new`] and [`IdempotentHandler::with_key`].
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

/// Most recent successful keys. The oldest key is forgotten once `capacity` is reached.
struct SeenKeys {
    keys: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenKeys {
    fn new(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: String) {
        if !self.keys.insert(key.clone()) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }
}

/// Skips events whose key already succeeded once.
///
/// The key is read from the payload with a JSON pointer (`/id` by default). Events
/// without a key are always passed through. Only the most recent keys are remembered,
/// so a redelivery older than the capacity is handled again.
pub struct IdempotentHandler {
    inner: Arc<dyn WebhookHandler>,
    key_pointer: String,
    seen: Mutex<SeenKeys>,
}

impl IdempotentHandler {
    pub fn new(inner: Arc<dyn WebhookHandler>) -> Self {
        Self::with_key(inner, "/id")
    }

    pub fn with_key(inner: Arc<dyn WebhookHandler>, key_pointer: impl Into<String>) -> Self {
        Self::with_capacity(inner, key_pointer, DEFAULT_SEEN_CAPACITY)
    }

    pub fn with_capacity(
        inner: Arc<dyn WebhookHandler>,
        key_pointer: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self {
            inner,
            key_pointer: key_pointer.into(),
            seen: Mutex::new(SeenKeys::new(capacity)),
        }
    }

    fn key(&self, event: &WebhookEvent) -> Option<String> {
        event.payload.pointer(&self.key_pointer).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, SeenKeys> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WebhookHandler for IdempotentHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError> {
        let Some(key) = self.key(event) else {
            return self.inner.handle(event).await;
        };
        if self.seen().contains(&key) {
            tracing::debug!(event_type = %event.event_type, key = %key, "Duplicate event skipped");
            return Ok(());
        }

        self.inner.handle(event).await?;
        self.seen().insert(key);
        Ok(())
    }
}
