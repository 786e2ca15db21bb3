//! `fetchq fetch <url> <output>` – direct download without the queue.
//!
//! Runs one transfer in the foreground with live per-part progress.
//! Useful for smoke-testing an origin before enqueueing real jobs.

use anyhow::Result;
use fetchq_core::control::CancelToken;
use fetchq_core::engine::{self, Outcome, ProgressObservation};
use std::time::{Duration, Instant};

const MIB: f64 = 1_048_576.0;

pub async fn run_fetch(url: String, output: String, threads: u32) -> Result<()> {
    anyhow::ensure!(!url.is_empty(), "url must not be empty");
    anyhow::ensure!(!output.is_empty(), "output path must not be empty");

    let cancel = CancelToken::new();
    let (obs_tx, mut obs_rx) = tokio::sync::watch::channel(ProgressObservation::default());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nfetchq: cancelling transfer...");
                cancel.cancel();
            }
        }
    });

    let printer = tokio::spawn(async move {
        let mut last_print = Instant::now() - Duration::from_secs(1);
        while obs_rx.changed().await.is_ok() {
            let obs = obs_rx.borrow_and_update().clone();
            if last_print.elapsed() < Duration::from_millis(500) {
                continue;
            }
            last_print = Instant::now();
            print_observation(&obs);
        }
    });

    let engine_url = url.clone();
    let engine_cancel = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        engine::execute(&engine_url, &output, threads, &engine_cancel, Some(&obs_tx))
    })
    .await??;
    let _ = printer.await;

    match outcome {
        Outcome::Success => {
            println!("\nDownload complete.");
            Ok(())
        }
        Outcome::Incomplete => {
            anyhow::bail!("transfer incomplete; progress saved, rerun to resume")
        }
    }
}

fn print_observation(obs: &ProgressObservation) {
    println!(
        "{:.1} / {:.1} MiB ({:.1}%)  parts {}/{}",
        obs.bytes_downloaded as f64 / MIB,
        obs.total_bytes as f64 / MIB,
        obs.percent,
        obs.parts_done(),
        obs.parts.len(),
    );
    for part in &obs.parts {
        let pct = if part.size > 0 {
            part.downloaded as f64 / part.size as f64 * 100.0
        } else {
            100.0
        };
        let state = if part.done { "done" } else { "downloading" };
        println!("  part {:>2}: {:>6.1}%  {}", part.index, pct, state);
    }
}
