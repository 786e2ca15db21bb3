//! Cancellation token threaded through one engine run.
//!
//! A single token is scoped to one transfer: signaling it makes every
//! fetcher abort promptly and the snapshotter exit after a final flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error used when a transfer is stopped by cancellation rather than failure.
#[derive(Debug)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transfer cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Cloneable cancellation flag. Fetchers poll it between network reads and
/// at the top of their retry loop; the write callback checks it so an
/// in-flight transfer aborts without waiting for the request timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
