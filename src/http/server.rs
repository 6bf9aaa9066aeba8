//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with webhook ingestion, health and admin routes
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::CoordinatorConfig;
use crate::coordinator::ResilienceCoordinator;
use crate::http::auth::admin_auth_middleware;
use crate::http::handlers;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ResilienceCoordinator>,
    pub config: Arc<CoordinatorConfig>,
}

pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(coordinator: Arc<ResilienceCoordinator>, config: Arc<CoordinatorConfig>) -> Self {
        let state = AppState {
            coordinator,
            config,
        };
        Self {
            router: build_router(state),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves.
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<(), std::io::Error>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/{event_type}", post(handlers::ingest_webhook));

    if config.admin.enabled {
        let admin = Router::new()
            .route("/admin/status", get(handlers::get_status))
            .route("/admin/violations", get(handlers::get_violations))
            .route("/admin/leaks", get(handlers::get_leaks))
            .route("/admin/migrations", get(handlers::get_migrations))
            .route("/admin/webhooks", get(handlers::get_webhooks))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                admin_auth_middleware,
            ));
        router = router.merge(admin);
    }

    router
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
