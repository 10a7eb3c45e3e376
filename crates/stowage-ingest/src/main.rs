//! Stowage bulk loader.
//!
//! Loads every JSON entry of a zip archive into MongoDB, one collection per
//! top-level folder, then builds the provenance and business-field indexes.
//!
//! # Usage
//!
//! ```bash
//! # Settings from the environment (or .env)
//! MONGO_URI=mongodb://localhost:27017 stowage-ingest
//!
//! # Explicit archive and database
//! stowage-ingest --archive ./Facturas.zip --database Facturas
//!
//! # Try an archive without touching a server
//! stowage-ingest --archive ./Facturas.zip --dry-run
//!
//! # Check stored counts afterwards, with metrics exposed
//! stowage-ingest --verify --metrics-port 9091
//! ```
//!
//! # Cancellation
//!
//! Ctrl+C lets the in-flight batch finish, skips the remaining partitions and
//! the index build, and still closes the archive and the connection.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stowage_core::metrics::{init_metrics, start_metrics_server};
use stowage_ingest::{
    Config, Connector, MemoryConnector, MemoryStore, MongoConnector, Orchestrator, RunOptions,
    RunReport, RunState,
};
use tracing_subscriber::EnvFilter;

/// Bulk-load a zip archive of JSON documents into MongoDB.
#[derive(Parser, Debug)]
#[command(name = "stowage-ingest")]
#[command(about = "Bulk-load a zip archive of JSON documents into MongoDB")]
#[command(version)]
struct Args {
    /// Path to a .env file (default: ./.env when present)
    #[arg(long)]
    dotenv: Option<PathBuf>,

    /// Zip archive to load (overrides ZIP_PATH)
    #[arg(long, short)]
    archive: Option<PathBuf>,

    /// MongoDB connection string (overrides MONGO_URI)
    #[arg(long)]
    uri: Option<String>,

    /// Destination database (overrides DATABASE_NAME)
    #[arg(long, short)]
    database: Option<String>,

    /// Records per bulk-write call (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Metrics HTTP server port, 0 to disable (overrides METRICS_PORT)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Load into an in-memory store instead of MongoDB
    #[arg(long)]
    dry_run: bool,

    /// Compare stored document counts with inserted counts after loading
    #[arg(long)]
    verify: bool,

    /// Skip index creation
    #[arg(long)]
    no_indexes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.dotenv {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&args)?;

    tracing::info!("Stowage loader starting...");
    tracing::info!("  Archive:    {}", config.archive_path.display());
    tracing::info!("  Database:   {}", config.store.database);
    tracing::info!("  Batch size: {}", config.batch_size);
    tracing::info!(
        "  Backend:    {}",
        if args.dry_run { "memory (dry run)" } else { "mongodb" }
    );

    if config.metrics_port > 0 {
        match init_metrics() {
            Some(handle) => start_metrics_server(config.metrics_port, handle)
                .await
                .context("Failed to start metrics server")?,
            None => tracing::warn!("Metrics recorder already installed"),
        }
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        tracing::info!("Cancellation requested, finishing the current batch...");
        cancel_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let options = RunOptions {
        build_indexes: !args.no_indexes,
        verify: args.verify,
    };
    let orchestrator = Orchestrator::new(config.clone(), options, cancel);

    let report = if args.dry_run {
        run(&orchestrator, &MemoryConnector::new(MemoryStore::new())).await?
    } else {
        run(&orchestrator, &MongoConnector::new(config.store.clone())).await?
    };

    print_summary(&config, &report);

    if report.state == RunState::Cancelled {
        bail!("Run cancelled before completion");
    }

    Ok(())
}

/// Environment first, then command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_env().context("Invalid configuration")?;

    if let Some(ref archive) = args.archive {
        config.archive_path = archive.clone();
    }
    if let Some(ref uri) = args.uri {
        config.store.uri = uri.clone();
    }
    if let Some(ref database) = args.database {
        config.store.database = database.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run<C: Connector>(orchestrator: &Orchestrator, connector: &C) -> Result<RunReport> {
    orchestrator.run(connector).await.map_err(|e| {
        let message = if e.is_fatal_setup() {
            "Load could not start"
        } else {
            "Load aborted"
        };
        anyhow::Error::new(e).context(message)
    })
}

fn print_summary(config: &Config, report: &RunReport) {
    let totals = report.totals();

    println!("\n══════════════════════════════════════════════════════════════════");
    println!("SUMMARY");
    println!("══════════════════════════════════════════════════════════════════\n");

    println!("Archive:     {}", config.archive_path.display());
    println!("Database:    {}", config.store.database);
    println!(
        "Started:     {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("State:       {}", report.state);
    println!();

    println!(
        "{:<28} {:>10} {:>10} {:>10} {:>8}",
        "Collection", "Entries", "Loaded", "Failed", "Batches"
    );
    for p in &report.partitions {
        println!(
            "{:<28} {:>10} {:>10} {:>10} {:>8}",
            p.collection,
            p.entries_seen,
            p.documents_inserted,
            p.failed_decode + p.documents_rejected + p.documents_lost,
            p.batches_dispatched
        );
    }
    println!();

    println!("Entries seen:       {:>12}", totals.entries_seen);
    println!("Documents loaded:   {:>12}", totals.loaded);
    println!("Decode failures:    {:>12}", totals.failed_decode);
    if totals.rejected > 0 {
        println!("Rejected by store:  {:>12}", totals.rejected);
    }
    if totals.batches_failed > 0 {
        println!(
            "Failed batches:     {:>12} ({} documents lost)",
            totals.batches_failed, totals.lost
        );
    }
    println!("Batches:            {:>12}", totals.batches);
    println!();

    println!("Collections loaded: {:>12}", report.collections().len());
    let failures: Vec<_> = report.indexes.failures().collect();
    println!(
        "Indexes created:    {:>12} across {} collections",
        report.indexes.indexes_created(),
        report.indexes.collections.len()
    );
    for failure in &failures {
        println!(
            "  ! {}: {}",
            failure.collection,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    if !report.reconciliation.is_empty() {
        println!();
        println!("Verification:");
        for check in &report.reconciliation {
            let stored = check
                .stored
                .map_or_else(|| "?".to_string(), |n| n.to_string());
            let mark = if check.matches() { "ok" } else { "MISMATCH" };
            println!(
                "  {:<26} expected {:>10}, stored {:>10}  {}",
                check.collection, check.expected, stored, mark
            );
        }
    }

    let load_secs = report.load_time().as_secs_f64();
    let rate = if load_secs > 0.0 {
        totals.loaded as f64 / load_secs
    } else {
        0.0
    };
    println!();
    println!("Load time:          {:>12.1}s", load_secs);
    println!("Total time:         {:>12.1}s", report.elapsed.as_secs_f64());
    println!("Throughput:         {:>12.0} docs/sec", rate);
}
