//! TDDF pipeline command-line interface

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use tddf_pipeline::{
    aggregate::{AggregationEngine, PeriodKey, RebuildOutcome},
    config::Args,
    db::MongoClient,
    ingest::{ingest_file, IngestOutcome},
    store::{MongoStore, PipelineStore},
    worker::{default_plan, run_drain, BacklogProcessor, ProcessorConfig, RecoveryController},
};

#[derive(Parser, Debug)]
#[command(name = "tddf-pipeline")]
#[command(about = "TDDF settlement file backlog pipeline")]
struct Cli {
    #[command(flatten)]
    args: Args,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one TDDF file into the backlog
    Ingest {
        /// Path to the TDDF file
        path: PathBuf,

        /// File identifier; defaults to date plus a random suffix
        #[arg(long)]
        id: Option<String>,
    },

    /// Process one batch of pending lines
    Process {
        /// Restrict to one file
        #[arg(long)]
        file: Option<String>,

        /// Lines to process; defaults to the configured batch size
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Run batches until the backlog drains or errors appear
    Drain {
        /// Restrict to one file
        #[arg(long)]
        file: Option<String>,
    },

    /// Revert stale claims to pending and sweep missed completions
    Reclaim,

    /// Rebuild the cache entry for one period (file:<id> or month:YYYY-MM)
    Rebuild { period: String },

    /// Rebuild cache entries for every known period
    RebuildAll,

    /// Show backlog status per file
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let args = cli.args;

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tddf_pipeline={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  TDDF Pipeline");
    info!("======================================");
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Database: {}", args.mongodb_db);
    info!("Worker: {}", args.owner);
    info!("Batch size: {}", args.batch_size);
    info!("Stale window: {} minutes", args.stale_after_minutes);
    info!("======================================");

    let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    let store: Arc<dyn PipelineStore> = Arc::new(MongoStore::new(&mongo).await?);

    let processor = BacklogProcessor::new(
        Arc::clone(&store),
        ProcessorConfig {
            owner: args.owner.clone(),
            default_batch_size: args.batch_size,
            stale_after: args.stale_after(),
        },
    );

    match cli.command {
        Command::Ingest { path, id } => {
            let content = std::fs::read_to_string(&path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let file_id = id.unwrap_or_else(|| {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("{}-{}", Utc::now().format("%Y%m%d"), &suffix[..8])
            });

            match ingest_file(store.as_ref(), &file_id, &name, &content).await? {
                IngestOutcome::Ingested {
                    file_id,
                    line_count,
                } => print_json(&json!({
                    "outcome": "ingested",
                    "file_id": file_id,
                    "line_count": line_count,
                })),
                IngestOutcome::AlreadyIngested { file_id } => print_json(&json!({
                    "outcome": "already-ingested",
                    "file_id": file_id,
                })),
            }
        }

        Command::Process { file, limit } => {
            let outcome = processor.process_batch(file.as_deref(), limit).await?;
            print_json(&json!({
                "processed": outcome.processed,
                "skipped": outcome.skipped,
                "errors": outcome.errors,
                "remaining": outcome.remaining,
            }));
        }

        Command::Drain { file } => {
            let outcome = run_drain(&processor, file.as_deref(), &default_plan()).await?;
            print_json(&json!({
                "processed": outcome.processed,
                "skipped": outcome.skipped,
                "errors": outcome.errors,
                "batches_run": outcome.batches_run,
                "drained": outcome.drained,
            }));
        }

        Command::Reclaim => {
            let recovery =
                RecoveryController::new(Arc::clone(&store), args.owner.clone(), args.stale_after());
            let reclaimed = recovery.reclaim_stale().await?;
            let completed = recovery.sweep_completions().await?;
            print_json(&json!({
                "reclaimed": reclaimed,
                "files_completed": completed,
            }));
        }

        Command::Rebuild { period } => {
            let period: PeriodKey = period.parse()?;
            let engine = AggregationEngine::new(Arc::clone(&store));
            match engine
                .rebuild(
                    &period,
                    tddf_pipeline::db::schemas::RebuildTrigger::Manual,
                    &args.owner,
                )
                .await?
            {
                RebuildOutcome::Completed {
                    period_key,
                    totals,
                    duration_ms,
                } => print_json(&json!({
                    "outcome": "completed",
                    "period_key": period_key,
                    "total_records": totals.total_records,
                    "counts_by_tag": totals.counts_by_tag,
                    "header_amount_minor": totals.header_amount_minor,
                    "transaction_amount_minor": totals.transaction_amount_minor,
                    "duration_ms": duration_ms,
                })),
                RebuildOutcome::Conflict => print_json(&json!({
                    "outcome": "conflict",
                })),
            }
        }

        Command::RebuildAll => {
            let engine = AggregationEngine::new(Arc::clone(&store));
            let outcome = engine
                .rebuild_all(
                    tddf_pipeline::db::schemas::RebuildTrigger::Manual,
                    &args.owner,
                )
                .await?;
            print_json(&json!({
                "completed": outcome.completed,
                "conflicts": outcome.conflicts,
                "failures": outcome.failures,
            }));
        }

        Command::Status => {
            let summary = store.status_summary().await?;
            print_json(&serde_json::to_value(&summary)?);
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => error!("Failed to render output: {}", e),
    }
}
