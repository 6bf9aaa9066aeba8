//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and addresses.
//! All problems are reported together rather than stopping at the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::CoordinatorConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &CoordinatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if url::Url::parse(&config.server.public_base_url).is_err() {
        errors.push(ValidationError::new(
            "server.public_base_url",
            "must be an absolute URL",
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::new(
            "server.max_body_bytes",
            "must be greater than zero",
        ));
    }

    if config.admin.enabled
        && (config.admin.api_key.is_empty() || config.admin.api_key == "CHANGE_ME_IN_PRODUCTION")
    {
        errors.push(ValidationError::new(
            "admin.api_key",
            "must be set when the admin API is enabled",
        ));
    }

    if config.constraints.max_correction_attempts == 0 {
        errors.push(ValidationError::new(
            "constraints.max_correction_attempts",
            "must be at least 1",
        ));
    }

    let leaks = &config.leaks;
    for (field, value) in [
        ("leaks.sample_interval_secs", leaks.sample_interval_secs),
        ("leaks.sweep_interval_secs", leaks.sweep_interval_secs),
        ("leaks.memory_threshold_bytes", leaks.memory_threshold_bytes),
        ("leaks.max_age_secs", leaks.max_age_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.migrations.records_per_minute == 0 {
        errors.push(ValidationError::new(
            "migrations.records_per_minute",
            "must be greater than zero",
        ));
    }

    let webhooks = &config.webhooks;
    if webhooks.default_max_attempts == 0 {
        errors.push(ValidationError::new(
            "webhooks.default_max_attempts",
            "must be at least 1",
        ));
    }
    if webhooks.backoff_base_secs == 0 {
        errors.push(ValidationError::new(
            "webhooks.backoff_base_secs",
            "must be greater than zero",
        ));
    }
    if webhooks.backoff_cap_secs < webhooks.backoff_base_secs {
        errors.push(ValidationError::new(
            "webhooks.backoff_cap_secs",
            "must not be smaller than backoff_base_secs",
        ));
    }

    if let Some(url) = &config.notifications.webhook_url {
        if url::Url::parse(url).is_err() {
            errors.push(ValidationError::new(
                "notifications.webhook_url",
                format!("'{url}' is not an absolute URL"),
            ));
        }
    }

    let obs = &config.observability;
    if !matches!(
        obs.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", obs.log_level),
        ));
    }
    if !matches!(obs.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be 'pretty' or 'json'",
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate_config(&CoordinatorConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_problem() {
        let mut config = CoordinatorConfig::default();
        config.server.bind_address = "nope".into();
        config.webhooks.default_max_attempts = 0;
        config.webhooks.backoff_cap_secs = 1;
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "server.bind_address",
                "admin.api_key",
                "webhooks.default_max_attempts",
                "webhooks.backoff_cap_secs",
            ]
        );
    }
}
