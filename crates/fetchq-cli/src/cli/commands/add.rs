//! `fetchq add <url> <output>` – enqueue a download job.

use anyhow::Result;
use fetchq_core::queue::{Job, JobQueue};

pub async fn run_add(queue: &JobQueue, url: &str, output: &str, threads: u32) -> Result<()> {
    anyhow::ensure!(!url.is_empty(), "url must not be empty");
    anyhow::ensure!(!output.is_empty(), "output path must not be empty");

    let job = Job::new(url, output, threads);
    queue.enqueue(&job).await?;
    println!("Enqueued job {} for URL: {url}", job.id);
    Ok(())
}
