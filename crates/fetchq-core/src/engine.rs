//! Transfer orchestration: probe, plan, fan out fetchers, snapshot, verify.
//!
//! The engine is synchronous; the worker runs it inside `spawn_blocking`.
//! It owns one supervisory thread (the caller), N fetcher threads, and one
//! snapshotter thread per run.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::control::CancelToken;
use crate::fetcher;
use crate::plan::Plan;
use crate::probe;
use crate::progress;
use crate::storage::StorageWriter;

/// Cadence of plan persistence and progress observations.
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);

/// Terminal result of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All parts done and the output file verified against the plan size.
    /// The progress file has been deleted.
    Success,
    /// Cancelled, or verification failed. The progress file is retained so
    /// a re-dispatched job resumes instead of restarting.
    Incomplete,
}

/// Per-part slice of a progress observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartProgress {
    pub index: usize,
    pub downloaded: u64,
    pub size: u64,
    pub done: bool,
}

/// Point-in-time view of a running transfer, published by the snapshotter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressObservation {
    pub percent: f64,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub parts: Vec<PartProgress>,
}

impl ProgressObservation {
    fn of(plan: &Plan) -> Self {
        Self {
            percent: plan.percent(),
            bytes_downloaded: plan.total_downloaded(),
            total_bytes: plan.total_size,
            parts: plan
                .parts
                .iter()
                .map(|p| PartProgress {
                    index: p.index,
                    downloaded: p.downloaded(),
                    size: p.size(),
                    done: p.is_done(),
                })
                .collect(),
        }
    }

    pub fn parts_done(&self) -> usize {
        self.parts.iter().filter(|p| p.done).count()
    }
}

/// Load a resumable plan for this request, or build a fresh one.
///
/// A stored plan is accepted only when its `url` and `output_path` both
/// match; anything else is a different transfer and is discarded. A fresh
/// plan probes the origin first and falls back to a single part when the
/// origin cannot serve ranges.
pub fn prepare(url: &str, output_path: &str, threads: u32) -> Result<Plan> {
    let progress_path = PathBuf::from(progress::progress_path_for(output_path));

    if let Some(existing) = progress::load(&progress_path) {
        if existing.matches(url, output_path) {
            tracing::info!(
                url,
                output_path,
                downloaded = existing.total_downloaded(),
                "resuming from existing progress"
            );
            return Ok(existing);
        }
        tracing::info!(url, output_path, "progress file is for a different transfer, starting fresh");
    }

    let probed = probe::probe(url).with_context(|| format!("probing {url}"))?;
    let effective_threads = if probed.supports_ranges {
        threads.clamp(1, 16)
    } else {
        tracing::info!(url, "origin does not support ranges, using a single part");
        1
    };

    let plan = Plan::new(url, output_path, probed.total_size, effective_threads);
    progress::save(&progress_path, &plan).context("persist initial plan")?;
    Ok(plan)
}

/// Drive a plan to completion: one fetcher thread per undone part plus a
/// snapshotter that persists the plan every 500 ms and publishes progress.
///
/// Returns `Incomplete` (not an error) when cancelled or when verification
/// fails; both leave the progress file behind for resumption.
pub fn run(
    plan: Arc<Plan>,
    cancel: &CancelToken,
    observations: Option<&tokio::sync::watch::Sender<ProgressObservation>>,
) -> Result<Outcome> {
    let progress_path = PathBuf::from(progress::progress_path_for(&plan.output_path));
    let storage = StorageWriter::open_or_create(plan.output_path.as_ref())?;

    let snapshot_stop = Arc::new(AtomicBool::new(false));
    let snapshotter = {
        let plan = Arc::clone(&plan);
        let stop = Arc::clone(&snapshot_stop);
        let path = progress_path.clone();
        let obs_tx = observations.cloned();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(SNAPSHOT_INTERVAL);
                if let Err(e) = progress::save(&path, &plan) {
                    tracing::warn!(error = %e, "periodic progress save failed");
                }
                if let Some(ref tx) = obs_tx {
                    let _ = tx.send(ProgressObservation::of(&plan));
                }
            }
        })
    };

    let mut fetchers = Vec::new();
    for part in plan.parts.iter().filter(|p| !p.is_done()) {
        let plan = Arc::clone(&plan);
        let index = part.index;
        let storage = storage.clone();
        let cancel = cancel.clone();
        fetchers.push(std::thread::spawn(move || {
            fetcher::fetch_part(&plan.url, &plan.parts[index], &storage, &cancel)
        }));
    }
    tracing::debug!(parts = fetchers.len(), url = %plan.url, "fetchers started");

    let mut aborted = false;
    for handle in fetchers {
        match handle.join() {
            Ok(fetcher::FetchOutcome::Done) => {}
            Ok(fetcher::FetchOutcome::Aborted) => aborted = true,
            Err(_) => {
                // A panicked fetcher leaves its part undone; verification
                // below reports Incomplete.
                tracing::error!(url = %plan.url, "fetcher thread panicked");
                aborted = true;
            }
        }
    }

    snapshot_stop.store(true, Ordering::Relaxed);
    let _ = snapshotter.join();
    progress::save(&progress_path, &plan).context("final progress save")?;
    if let Some(tx) = observations {
        let _ = tx.send(ProgressObservation::of(&plan));
    }

    if aborted || !plan.is_complete() {
        return Ok(Outcome::Incomplete);
    }

    let on_disk = storage.len()?;
    if on_disk != plan.total_size {
        tracing::error!(
            expected = plan.total_size,
            actual = on_disk,
            output = %plan.output_path,
            "size verification failed"
        );
        return Ok(Outcome::Incomplete);
    }

    progress::delete(&progress_path);
    tracing::info!(output = %plan.output_path, size = on_disk, "transfer verified");
    Ok(Outcome::Success)
}

/// Prepare and run in one call; the shape the worker uses.
pub fn execute(
    url: &str,
    output_path: &str,
    threads: u32,
    cancel: &CancelToken,
    observations: Option<&tokio::sync::watch::Sender<ProgressObservation>>,
) -> Result<Outcome> {
    let plan = prepare(url, output_path, threads)?;
    run(Arc::new(plan), cancel, observations)
}
