//! Configuration schema definitions.
//!
//! Every section has a `Default`, so an empty file is a valid configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration for the coordinator service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Constraint violation policy.
    pub constraints: ConstraintConfig,

    /// Leak detection thresholds and intervals.
    pub leaks: LeakConfig,

    /// Migration backups.
    pub migrations: MigrationConfig,

    /// Webhook retry policy.
    pub webhooks: WebhookConfig,

    /// Alert delivery.
    pub notifications: NotificationConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8090").
    pub bind_address: String,

    /// Base URL that webhook senders reach this service on.
    pub public_base_url: String,

    /// Total time allowed per request in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8090".to_string(),
            public_base_url: "http://localhost:8090".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: placeholder, validation rejects it when the admin API is enabled.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Fields whose unique violations need a human (matched case-insensitively).
    pub identity_fields: Vec<String>,

    /// Values used to fill columns rejected as null, keyed by column name.
    pub retry_defaults: HashMap<String, Value>,

    /// Corrected retries per write before giving up.
    pub max_correction_attempts: u32,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            identity_fields: vec![
                "email".to_string(),
                "username".to_string(),
                "phone".to_string(),
            ],
            retry_defaults: HashMap::new(),
            max_correction_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LeakConfig {
    /// Per-connection sampling period in seconds.
    pub sample_interval_secs: u64,

    /// Global sweep period in seconds.
    pub sweep_interval_secs: u64,

    /// Per-connection memory limit.
    pub memory_threshold_bytes: u64,

    /// Per-connection age limit in seconds.
    pub max_age_secs: u64,

    /// Aggregate memory that raises an alert on sweep.
    pub aggregate_alert_bytes: u64,
}

impl LeakConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for LeakConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 30,
            sweep_interval_secs: 300,
            memory_threshold_bytes: 50 * 1024 * 1024,
            max_age_secs: 30 * 60,
            aggregate_alert_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory that receives one sub-directory per migration backup.
    pub backup_dir: PathBuf,

    /// Restore throughput used for rollback estimates.
    pub records_per_minute: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backups"),
            records_per_minute: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Attempt budget when the caller does not pass one.
    pub default_max_attempts: u32,

    /// Delay before the first retry in seconds. Doubles per retry.
    pub backoff_base_secs: u64,

    /// Upper bound on a single retry delay in seconds.
    pub backoff_cap_secs: u64,

    /// JSON-lines file receiving dead-lettered webhooks.
    pub dead_letter_path: PathBuf,
}

impl WebhookConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 5,
            backoff_base_secs: 60,
            backoff_cap_secs: 16 * 60,
            dead_letter_path: PathBuf::from("./dead_letters.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Push endpoint for alerts. Alerts are only logged when unset.
    pub webhook_url: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9091".to_string(),
        }
    }
}
