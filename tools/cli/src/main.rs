//! meterlog CLI - push local usage records to the remote service.
//!
//! This tool drives the push synchronization engine: `push` runs one push
//! session, `push-status` shows the local sync state without touching the
//! network.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use meterlog_common::Error;
use meterlog_push::{ApiClient, PushConfig, PushReport, PushSession, StoredCredentials};
use meterlog_store::UsageDb;

/// Default remote endpoint; override with --endpoint or METERLOG_API_URL.
const DEFAULT_API_URL: &str = "https://api.meterlog.dev";

#[derive(Parser)]
#[command(name = "meterlog")]
#[command(about = "meterlog - local usage tracking with remote sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push unsynchronized usage records to the remote service.
    Push {
        /// Messages per batch.
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
        batch_size: u64,

        /// Report what would be pushed without sending anything.
        #[arg(long)]
        dry_run: bool,

        /// Reset retry state for unsynchronized messages before pushing.
        #[arg(long)]
        force: bool,

        /// Limit the force reset to specific message ids (repeatable).
        #[arg(long = "only", value_name = "MESSAGE_ID")]
        only: Vec<String>,

        /// Path to the usage database.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Remote service base URL.
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Show synchronization statistics for the local store.
    PushStatus {
        /// Path to the usage database.
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Push {
            batch_size,
            dry_run,
            force,
            only,
            db,
            endpoint,
        } => cmd_push(batch_size, dry_run, force, only, db, endpoint).await,

        Commands::PushStatus { db } => cmd_push_status(db),
    }
}

/// Resolve the database path, defaulting under the platform data directory.
fn resolve_db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = db {
        return Ok(path);
    }
    let data_dir = dirs::data_dir().context("No data directory available")?;
    Ok(data_dir.join("meterlog").join("usage.db"))
}

fn resolve_endpoint(endpoint: Option<String>) -> String {
    endpoint
        .or_else(|| std::env::var("METERLOG_API_URL").ok())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

/// Run one push session.
async fn cmd_push(
    batch_size: u64,
    dry_run: bool,
    force: bool,
    only: Vec<String>,
    db: Option<PathBuf>,
    endpoint: Option<String>,
) -> Result<()> {
    let db_path = resolve_db_path(db)?;
    let db = UsageDb::open(&db_path)
        .with_context(|| format!("Failed to open usage database at {}", db_path.display()))?;

    let credentials = Arc::new(StoredCredentials::load_default()?);
    let client = ApiClient::new(resolve_endpoint(endpoint), credentials.clone())?;

    let config = PushConfig {
        batch_size: batch_size as usize,
        dry_run,
        force,
        force_scope: if only.is_empty() { None } else { Some(only) },
        ..Default::default()
    };

    let mut session = PushSession::new(db, client, credentials, config);
    match session.run().await {
        Ok(report) => {
            print_report(&report, dry_run);
            Ok(())
        }
        Err(e) => {
            print_fatal_hint(&e);
            Err(e.into())
        }
    }
}

fn print_report(report: &PushReport, dry_run: bool) {
    if dry_run {
        println!("Dry run:");
        println!("  Eligible messages: {}", report.eligible);
        println!(
            "  Batches required:  {}",
            report.planned_batches.unwrap_or(0)
        );
        return;
    }

    if let Some(reset) = report.reset {
        println!("Force reset: {} messages made eligible again", reset);
    }

    if report.eligible == 0 {
        println!("Nothing to push: all messages are synced or at the retry limit.");
        println!("Use --force to retry messages that hit the limit.");
        return;
    }

    println!("Push complete:");
    println!("  Batches sent:  {}", report.batches_sent);
    println!("  Persisted:     {}", report.persisted);
    println!("  Deduplicated:  {}", report.deduplicated);
    println!("  Failed:        {}", report.failed);

    if !report.failure_samples.is_empty() {
        println!("  Failure samples:");
        for sample in &report.failure_samples {
            println!("    - {}", sample);
        }
    }

    if report.aborted.is_some() {
        println!("Session ended early: endpoint unreachable.");
        println!("Remaining messages stay queued; run push again once connectivity returns.");
    }
}

fn print_fatal_hint(error: &Error) {
    match error {
        Error::Precondition(_) => {
            eprintln!("No credential found. Log in first, then run push again.");
        }
        Error::Authentication(_) => {
            eprintln!("Your credential is no longer valid. Re-authenticate and run push again.");
        }
        Error::Network(_) => {
            eprintln!("Could not reach the service. Check your connectivity and try again.");
        }
        _ => {}
    }
}

/// Show sync statistics (read-only).
fn cmd_push_status(db: Option<PathBuf>) -> Result<()> {
    let db_path = resolve_db_path(db)?;
    let db = UsageDb::open(&db_path)
        .with_context(|| format!("Failed to open usage database at {}", db_path.display()))?;

    let stats = db.sync_stats()?;

    println!("Sync status:");
    println!("  Total messages:    {}", stats.total);
    println!("  Synced:            {}", stats.synced);
    println!("  Unsynced:          {}", stats.unsynced);

    if !stats.retry_histogram.is_empty() {
        println!("  Retries (unsynced):");
        for (retries, count) in &stats.retry_histogram {
            println!("    {} retries: {} messages", retries, count);
        }
    }

    Ok(())
}
