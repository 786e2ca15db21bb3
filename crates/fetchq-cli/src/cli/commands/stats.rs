//! `fetchq stats` – queue list lengths.

use anyhow::Result;
use fetchq_core::queue::JobQueue;

pub async fn run_stats(queue: &JobQueue) -> Result<()> {
    let stats = queue.stats().await?;
    println!("{:<12} {}", "pending", stats.pending);
    println!("{:<12} {}", "in_flight", stats.in_flight);
    println!("{:<12} {}", "completed", stats.completed);
    println!("{:<12} {}", "failed", stats.failed);
    println!("{:<12} {}", "total", stats.total());
    Ok(())
}
