//! Startup orchestration for the service binary.
//!
//! Order: logging, metrics, notifier, coordinator, leak sweeper, listener.
//! Any error before the listener is bound is fatal.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{CoordinatorConfig, ConfigError};
use crate::coordinator::ResilienceCoordinator;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::wait_for_shutdown_signal;
use crate::observability::{init_logging, init_metrics};
use crate::store::{HttpNotifier, LogNotifier, Notifier, NotifyError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("notifier: {0}")]
    Notifier(#[from] NotifyError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Alert sink chosen by config.
pub fn build_notifier(config: &CoordinatorConfig) -> Result<Arc<dyn Notifier>, StartupError> {
    Ok(match &config.notifications.webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    })
}

/// Run the service until SIGINT or SIGTERM.
pub async fn run(config: CoordinatorConfig) -> Result<(), StartupError> {
    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilience-coordinator starting");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        init_metrics(addr)?;
    }

    let notifier = build_notifier(&config)?;
    let coordinator = Arc::new(
        ResilienceCoordinator::builder(config.clone())
            .notifier(notifier)
            .build(),
    );
    tracing::info!(
        bind_address = %config.server.bind_address,
        dead_letter_path = ?config.webhooks.dead_letter_path,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let sweeper = tokio::spawn(coordinator.leaks().clone().run_sweeper(shutdown.subscribe()));

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.server.bind_address.clone(),
            source,
        })?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal.trigger();
    });

    let server = HttpServer::new(coordinator.clone(), Arc::new(config));
    server.run(listener, shutdown.wait()).await?;

    let _ = sweeper.await;
    coordinator.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
