//! `fetchq work` – run a worker pool until interrupted.

use anyhow::Result;
use fetchq_core::ledger::SqliteLedger;
use fetchq_core::queue::JobQueue;
use fetchq_core::worker::{WorkerOptions, WorkerPool};
use std::sync::Arc;

pub async fn run_work(queue: JobQueue, ledger: Arc<SqliteLedger>, workers: usize) -> Result<()> {
    let pool = WorkerPool::new(queue, ledger, WorkerOptions::default());
    let shutdown = pool.shutdown_token();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown signal received, stopping workers");
        eprintln!("\nfetchq: shutting down, waiting for in-flight transfers...");
        shutdown.cancel();
    });

    println!("Running {workers} worker(s); press Ctrl-C to stop.");
    pool.run(workers).await?;
    println!("All workers stopped.");
    Ok(())
}
