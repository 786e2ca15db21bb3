//! `fetchq status <id>` – show one job's status.

use anyhow::Result;
use fetchq_core::ledger::{DownloadLedger, SqliteLedger};
use fetchq_core::queue::JobQueue;

pub async fn run_status(queue: &JobQueue, ledger: &SqliteLedger, id: &str) -> Result<()> {
    let Some(status) = queue.get_status(id).await? else {
        anyhow::bail!("job {id} not found");
    };

    println!("Job:       {}", status.id);
    println!("State:     {}", status.state.as_str());
    println!("Progress:  {:.1}%", status.progress);
    if status.total_bytes > 0 {
        println!(
            "Bytes:     {} / {}",
            status.bytes_downloaded, status.total_bytes
        );
    }
    if let Some(worker) = &status.worker_id {
        println!("Worker:    {worker}");
    }
    if let Some(message) = &status.error_message {
        println!("Error:     {message}");
    }

    // Enrich with the ledger row when we have one; the queue entry stays
    // authoritative for live state.
    if let Some(row) = ledger.get(id).await? {
        println!("URL:       {}", row.url);
        println!("Output:    {}", row.output_path);
        println!("Threads:   {}", row.threads);
    }
    Ok(())
}
