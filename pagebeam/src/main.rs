//! pagebeam - operator CLI for the pagebeam tracking pipeline
//!
//! This tool provides commands for:
//! - Replaying captured signal journals through the pipeline
//! - Sending one-off custom events to the collection endpoint
//! - Checking tracker configuration and endpoint reachability
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/pagebeam/config.toml (~/.config/pagebeam/config.toml)
//! - Logs: $XDG_STATE_HOME/pagebeam/pagebeam.log (~/.local/state/pagebeam/pagebeam.log)

mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pagebeam_core::{
    AttributionStore, Config, DeliveryClient, EventBuilder, MemoryStore, SnapshotPage,
};

#[derive(Parser)]
#[command(name = "pagebeam")]
#[command(about = "First-party page analytics pipeline")]
#[command(version)]
struct Args {
    /// Verbose output (log to the XDG state directory)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSONL signal journal through the tracking pipeline
    Replay {
        /// Journal file (one PageSignal JSON object per line)
        journal: PathBuf,

        /// User agent reported for replayed events
        #[arg(long, default_value = "pagebeam-replay/0.1")]
        user_agent: String,

        /// Parse and count signals without delivering anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Build one custom event and deliver it immediately with retry
    Send {
        /// Event name
        event: String,

        /// Extra fields as key=value pairs
        #[arg(short, long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,
    },

    /// Show resolved tracker configuration and probe the endpoint
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration (with PAGEBEAM_* env overrides)
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging if verbose
    let _log_guard = if args.verbose {
        Some(
            pagebeam_core::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    match args.command {
        Command::Replay {
            journal,
            user_agent,
            dry_run,
        } => runtime.block_on(replay::run(&config.tracker, &journal, &user_agent, dry_run)),
        Command::Send { event, data } => runtime.block_on(run_send(&config, &event, &data)),
        Command::Status => runtime.block_on(run_status(&config)),
    }
}

async fn run_send(config: &Config, event: &str, data: &[String]) -> Result<()> {
    anyhow::ensure!(!event.trim().is_empty(), "event name must not be empty");

    let client =
        DeliveryClient::new(config.tracker.clone()).context("failed to create delivery client")?;

    let page = Arc::new(SnapshotPage::new(format!(
        "pagebeam-cli/{}",
        env!("CARGO_PKG_VERSION")
    )));
    let builder = EventBuilder::new(page, AttributionStore::new(Arc::new(MemoryStore::new())));

    let mut extra = serde_json::Map::new();
    for pair in data {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid --data pair (expected KEY=VALUE): {}", pair))?;
        extra.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    let record = builder.build(event, extra);
    let result = client
        .send_with_retry(
            &record,
            config.tracker.max_attempts,
            config.tracker.retry_base_delay(),
        )
        .await;

    if result.success {
        println!("Delivered '{}' to {}", event, client.endpoint());
        if let Some(message) = result.message {
            println!("  {}", message);
        }
        Ok(())
    } else {
        anyhow::bail!(
            "delivery failed after {} attempt(s): {}",
            config.tracker.max_attempts,
            result.error.unwrap_or_else(|| "unknown".to_string())
        )
    }
}

async fn run_status(config: &Config) -> Result<()> {
    let tracker = &config.tracker;
    let client =
        DeliveryClient::new(tracker.clone()).context("failed to create delivery client")?;

    println!("Endpoint:       {}", client.endpoint());
    println!("Environment:    {:?}", tracker.environment);
    println!(
        "Auth:           {}",
        if tracker.api_key.is_some() {
            "bearer token configured"
        } else {
            "none"
        }
    );
    println!("Batch size:     {}", tracker.batch_size);
    println!("Flush interval: {}ms", tracker.flush_interval_ms);

    if client.suppressed() {
        println!("Delivery:       suppressed (non-production, force_send off)");
    }

    if client.health_check().await {
        println!("Endpoint probe: reachable");
    } else {
        println!("Endpoint probe: unreachable");
    }

    Ok(())
}
