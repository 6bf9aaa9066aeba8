//! Alert delivery.

use std::time::Duration;

use async_trait::async_trait;

use crate::store::{Alert, AlertLevel, Notifier, NotifyError};

/// Writes alerts to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        match alert.level {
            AlertLevel::Info => tracing::info!(
                component = %alert.component,
                title = %alert.title,
                "{}", alert.message
            ),
            AlertLevel::Warning => tracing::warn!(
                component = %alert.component,
                title = %alert.title,
                "{}", alert.message
            ),
            AlertLevel::Critical => tracing::error!(
                component = %alert.component,
                title = %alert.title,
                "{}", alert.message
            ),
        }
        Ok(())
    }
}

/// Posts alerts as JSON to a push endpoint.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError(format!(
                "push endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
