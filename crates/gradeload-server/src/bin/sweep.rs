//! One-shot import sweep
//!
//! Runs a single `process_queue()` against the configured datastore and
//! exits, for deployments where cron or another scheduler drives the queue.
//!
//! Usage:
//!   gradeload-sweep [--purge] [--database-url URL]

use anyhow::Result;
use clap::Parser;
use gradeload_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

use gradeload_server::{
    config::Config,
    import::{ImportConfig, ImportPipeline},
    storage::StorageConfig,
    store,
};

#[derive(Debug, Parser)]
#[command(name = "gradeload-sweep", version, about = "Advance the grade import queue once")]
struct Cli {
    /// Datastore to sweep; defaults to the server configuration
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Also expire uploads older than the retention window
    #[arg(long)]
    purge: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .log_file_prefix("gradeload-sweep")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let mut config = Config::load()?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let store = store::connect(&config.database).await?;
    store.ensure_schema().await?;
    let storage = StorageConfig::from_env()?.init().await?;
    let pipeline = ImportPipeline::new(store, storage, ImportConfig::from_env()?);

    let report = pipeline.processor.process_queue().await?;
    info!(
        skipped = report.skipped,
        tasks = report.tasks_visited,
        completed = report.files_completed,
        failed = report.files_failed,
        timed_out = report.files_timed_out,
        requeued = report.files_requeued,
        abandoned = report.files_abandoned,
        swapped = ?report.tasks_swapped,
        tasks_failed = ?report.tasks_failed,
        "Sweep complete"
    );

    if cli.purge {
        let purge = pipeline
            .uploads
            .purge_older_than(pipeline.config.retention())
            .await?;
        info!(expired = purge.expired, failed = purge.failed, "Purge complete");
    }

    Ok(())
}
