use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Operator CLI for the resilience coordinator admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8090", env = "RESILIENCE_URL")]
    url: String,

    #[arg(short, long, env = "RESILIENCE_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate counts across all coordinators
    Status,
    /// Unresolved constraint violations
    Violations,
    /// Active connections and leak reports
    Leaks,
    /// Migration history
    Migrations,
    /// Failed webhook deliveries
    Webhooks {
        /// Only show records with this status (retrying, dead_letter, resolved, failed)
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let (path, filter) = match &cli.command {
        Commands::Status => ("status", None),
        Commands::Violations => ("violations", None),
        Commands::Leaks => ("leaks", None),
        Commands::Migrations => ("migrations", None),
        Commands::Webhooks { status } => ("webhooks", status.clone()),
    };

    let res = client
        .get(format!("{base}/admin/{path}"))
        .headers(headers)
        .send()
        .await?;
    print_response(res, filter.as_deref()).await?;

    Ok(())
}

async fn print_response(
    res: reqwest::Response,
    status_filter: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let mut json: Value = res.json().await?;
    if let (Some(wanted), Value::Array(items)) = (status_filter, &mut json) {
        items.retain(|item| item.get("status").and_then(Value::as_str) == Some(wanted));
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
