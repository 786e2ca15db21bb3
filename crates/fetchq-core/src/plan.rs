//! Transfer plan: the segmentation of one download into byte ranges.
//!
//! A `Plan` is built once per transfer (after probing the origin) and then
//! shared read-only between the fetchers and the snapshotter. The only
//! mutable state is per-part: an atomic byte counter and a done flag, so
//! the snapshotter can read while fetchers write without locking.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One contiguous byte extent `[start, end]` (inclusive) of the output file.
#[derive(Debug)]
pub struct Part {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    downloaded: AtomicU64,
    done: AtomicBool,
}

impl Part {
    fn new(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            downloaded: AtomicU64::new(0),
            done: AtomicBool::new(false),
        }
    }

    /// Extent size in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Bytes written so far for this part.
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Advance the byte counter after a successful disk write.
    pub fn add_downloaded(&self, n: u64) {
        self.downloaded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    /// Once set, the flag is never cleared.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    /// HTTP Range header value for the remaining bytes of this part.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.start + self.downloaded(), self.end)
    }
}

/// Segmentation record for one transfer. Immutable apart from the per-part
/// counters; safe to share via `Arc` across fetcher threads.
#[derive(Debug)]
pub struct Plan {
    pub url: String,
    pub output_path: String,
    pub total_size: u64,
    pub threads: u32,
    pub parts: Vec<Part>,
}

/// Persisted form of a `Part` (see `PlanSnapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartSnapshot {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub done: bool,
}

/// Persisted form of a `Plan`: the progress-store JSON document.
/// Field names are the on-disk format and must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub url: String,
    pub filename: String,
    pub total_size: u64,
    pub num_threads: u32,
    pub parts: Vec<PartSnapshot>,
}

impl Plan {
    /// Build a fresh plan: `threads` contiguous parts covering
    /// `[0, total_size)`, the last part absorbing the division remainder.
    /// `threads` is clamped so no part is empty when the file is tiny.
    pub fn new(url: &str, output_path: &str, total_size: u64, threads: u32) -> Self {
        let threads = (threads as u64).clamp(1, total_size.max(1)) as u32;
        let part_size = total_size / threads as u64;
        let mut parts = Vec::with_capacity(threads as usize);
        for i in 0..threads as u64 {
            let start = i * part_size;
            let end = if i == threads as u64 - 1 {
                total_size.saturating_sub(1)
            } else {
                start + part_size - 1
            };
            parts.push(Part::new(i as usize, start, end));
        }
        Self {
            url: url.to_string(),
            output_path: output_path.to_string(),
            total_size,
            threads,
            parts,
        }
    }

    /// True iff this plan was built for the same request. A mismatch means
    /// the progress file belongs to a different transfer and must be discarded.
    pub fn matches(&self, url: &str, output_path: &str) -> bool {
        self.url == url && self.output_path == output_path
    }

    /// Total bytes written across all parts. Reads the live counters; the
    /// value is consistent per part but may be torn across parts, which is
    /// fine because each part is independent.
    pub fn total_downloaded(&self) -> u64 {
        self.parts.iter().map(|p| p.downloaded()).sum()
    }

    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.total_downloaded() as f64 / self.total_size as f64 * 100.0
    }

    pub fn parts_done(&self) -> usize {
        self.parts.iter().filter(|p| p.is_done()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(|p| p.is_done())
    }

    /// Point-in-time copy of the counters for persistence.
    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            url: self.url.clone(),
            filename: self.output_path.clone(),
            total_size: self.total_size,
            num_threads: self.threads,
            parts: self
                .parts
                .iter()
                .map(|p| PartSnapshot {
                    index: p.index,
                    start: p.start,
                    end: p.end,
                    downloaded: p.downloaded(),
                    done: p.is_done(),
                })
                .collect(),
        }
    }

    /// Rebuild a live plan from a persisted snapshot.
    pub fn from_snapshot(snap: PlanSnapshot) -> Self {
        let parts = snap
            .parts
            .into_iter()
            .map(|p| {
                let part = Part::new(p.index, p.start, p.end);
                part.downloaded.store(p.downloaded, Ordering::Relaxed);
                part.done.store(p.done, Ordering::Relaxed);
                part
            })
            .collect();
        Self {
            url: snap.url,
            output_path: snap.filename,
            total_size: snap.total_size,
            threads: snap.num_threads,
            parts,
        }
    }
}
