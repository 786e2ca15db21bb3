use anyhow::Result;
use clap::{Parser, Subcommand};
use fetchq_core::config::{self, FetchqConfig};
use fetchq_core::ledger::SqliteLedger;
use fetchq_core::queue::{JobQueue, SqliteListStore};
use std::sync::Arc;

mod commands;

/// Top-level CLI for the fetchq download service.
#[derive(Debug, Parser)]
#[command(name = "fetchq")]
#[command(about = "fetchq: distributed segmented download service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Enqueue a download job.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Path the downloaded file is written to.
        output: String,

        /// Parallel ranges for this transfer (clamped to 1-16).
        #[arg(long)]
        threads: Option<u32>,
    },

    /// Download one URL in the foreground, bypassing the queue.
    Fetch {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Path the downloaded file is written to.
        output: String,

        /// Parallel ranges for this transfer (clamped to 1-16).
        #[arg(long)]
        threads: Option<u32>,
    },

    /// Run a worker pool until interrupted.
    Work {
        /// Number of workers; defaults to the configured worker_count.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show the status of one job.
    Status {
        /// Job identifier printed by `add`.
        id: String,
    },

    /// Show the lengths of the queue lists.
    Stats,

    /// Run one orphan-reclamation pass by hand.
    Reclaim,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        // Direct fetch never touches the queue store.
        let command = match cli.command {
            CliCommand::Fetch { url, output, threads } => {
                let threads = threads.unwrap_or(cfg.default_threads);
                return commands::fetch::run_fetch(url, output, threads).await;
            }
            other => other,
        };

        let queue = open_queue(&cfg).await?;

        match command {
            CliCommand::Add { url, output, threads } => {
                let threads = threads.unwrap_or(cfg.default_threads);
                commands::add::run_add(&queue, &url, &output, threads).await?;
            }
            CliCommand::Fetch { .. } => unreachable!("handled above"),
            CliCommand::Work { workers } => {
                let workers = workers.unwrap_or(cfg.worker_count);
                let ledger = open_ledger(&cfg).await?;
                commands::work::run_work(queue, ledger, workers).await?;
            }
            CliCommand::Status { id } => {
                let ledger = open_ledger(&cfg).await?;
                commands::status::run_status(&queue, &ledger, &id).await?;
            }
            CliCommand::Stats => {
                commands::stats::run_stats(&queue).await?;
            }
            CliCommand::Reclaim => {
                let reclaimed = queue.reclaim_orphans().await?;
                println!("Reclaimed {reclaimed} orphaned job(s).");
            }
        }

        Ok(())
    }
}

async fn open_queue(cfg: &FetchqConfig) -> Result<JobQueue> {
    let store = match &cfg.queue_db {
        Some(path) => SqliteListStore::open_at(path).await?,
        None => SqliteListStore::open_default().await?,
    };
    Ok(JobQueue::new(Arc::new(store)))
}

async fn open_ledger(cfg: &FetchqConfig) -> Result<Arc<SqliteLedger>> {
    let ledger = match &cfg.ledger_db {
        Some(path) => SqliteLedger::open_at(path).await?,
        None => SqliteLedger::open_default().await?,
    };
    Ok(Arc::new(ledger))
}
