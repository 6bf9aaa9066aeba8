//! Resilience coordinator service.
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!   webhook sender   │  http/  ──▶ webhooks/ ──▶ handler (attempt 1)    │
//!   ─────────────────┼─▶              │                                 │
//!                    │                ▼                                 │
//!                    │          retry chains ──▶ dead letters (JSONL)   │
//!                    │                                                  │
//!   operator / CLI   │  /admin/* ──▶ registry/ (violations, leaks,     │
//!   ─────────────────┼─▶              migrations, webhook failures)     │
//!                    │                                                  │
//!                    │  leaks/ sweeper ──▶ notifier (log or HTTP push)  │
//!                    └──────────────────────────────────────────────────┘
//! ```
//!
//! Constraint resolution and migrations are library APIs; they need the application's
//! record store and are not driven by this binary.

use std::path::PathBuf;

use clap::Parser;

use resilience_coordinator::config::{load_config, validate_config, ConfigError, CoordinatorConfig};
use resilience_coordinator::lifecycle::startup;

#[derive(Parser)]
#[command(name = "resilience-coordinator")]
#[command(about = "Webhook retry, leak monitoring and migration safety service", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => {
            let config = CoordinatorConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };

    startup::run(config).await?;
    Ok(())
}
