//! Single-range download loop: ranged GET, offset writes, endless retry.
//!
//! One fetcher owns one part of the plan. Every attempt recomputes its
//! resume offset from the part's byte counter, so a failed attempt simply
//! retries from wherever the last successful disk write left off. Partial
//! writes are kept; there is no rollback. Cancellation is the only exit
//! besides completion.

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::control::CancelToken;
use crate::plan::Part;
use crate::storage::StorageWriter;
use crate::USER_AGENT;

/// Delay between attempts after any transient failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Per-request wall-clock deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Copy unit: curl's receive buffer, which bounds write chunk size.
const COPY_BUFFER: usize = 32 * 1024;

/// Terminal result of a fetcher. Errors are never terminal; they retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The part's full extent is on disk.
    Done,
    /// Cancellation fired before the part completed.
    Aborted,
}

/// One attempt's failure, for logging and the retry decision. Every variant
/// is transient here: connection, status, and disk errors all retry.
#[derive(Debug)]
enum FetchError {
    Curl(curl::Error),
    Http(u32),
    Storage(io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Curl(e) => write!(f, "{e}"),
            FetchError::Http(code) => write!(f, "HTTP {code}"),
            FetchError::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

/// Download `[part.start + downloaded, part.end]` into the output file,
/// advancing the part's counter after each successful write.
pub fn fetch_part(
    url: &str,
    part: &Part,
    storage: &StorageWriter,
    cancel: &CancelToken,
) -> FetchOutcome {
    loop {
        if cancel.is_cancelled() {
            return FetchOutcome::Aborted;
        }

        let current_start = part.start + part.downloaded();
        if current_start > part.end {
            part.mark_done();
            return FetchOutcome::Done;
        }

        match attempt(url, part, current_start, storage, cancel) {
            Ok(()) => {
                if part.downloaded() >= part.size() {
                    part.mark_done();
                    return FetchOutcome::Done;
                }
                // Clean end-of-stream short of the extent: the origin closed
                // early. Retry from the recomputed offset.
                tracing::debug!(
                    part = part.index,
                    downloaded = part.downloaded(),
                    size = part.size(),
                    "stream ended early, retrying"
                );
            }
            Err(e) => {
                if cancel.is_cancelled() {
                    return FetchOutcome::Aborted;
                }
                tracing::debug!(part = part.index, error = %e, "part attempt failed, retrying");
            }
        }

        if !sleep_cancellable(RETRY_DELAY, cancel) {
            return FetchOutcome::Aborted;
        }
    }
}

/// One ranged GET. Bytes are written at `current_start + offset_in_attempt`
/// as they arrive; the part counter advances only after the disk write
/// succeeds, so the counter never exceeds what is actually on disk.
fn attempt(
    url: &str,
    part: &Part,
    current_start: u64,
    storage: &StorageWriter,
    cancel: &CancelToken,
) -> Result<(), FetchError> {
    // Status of the current header block; only 200/206 bodies are written.
    let status = Arc::new(AtomicU32::new(0));
    let attempt_offset = Arc::new(AtomicU64::new(0));
    let storage_error: Arc<Mutex<Option<io::Error>>> = Arc::new(Mutex::new(None));

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(FetchError::Curl)?;
    easy.useragent(USER_AGENT).map_err(FetchError::Curl)?;
    easy.follow_location(true).map_err(FetchError::Curl)?;
    easy.timeout(REQUEST_TIMEOUT).map_err(FetchError::Curl)?;
    easy.buffer_size(COPY_BUFFER).map_err(FetchError::Curl)?;
    easy.range(&format!("{}-{}", current_start, part.end))
        .map_err(FetchError::Curl)?;

    {
        let status_hdr = Arc::clone(&status);
        let status_body = Arc::clone(&status);
        let offset = Arc::clone(&attempt_offset);
        let storage_error_cb = Arc::clone(&storage_error);
        let storage = storage.clone();
        let cancel = cancel.clone();

        let mut transfer = easy.transfer();
        transfer
            .header_function(move |data| {
                if let Ok(line) = std::str::from_utf8(data) {
                    // "HTTP/1.1 206 Partial Content" — one block per redirect
                    // hop; the last block wins.
                    if let Some(rest) = line.strip_prefix("HTTP/") {
                        if let Some(code) = rest.split_whitespace().nth(1) {
                            if let Ok(code) = code.parse::<u32>() {
                                status_hdr.store(code, Ordering::Relaxed);
                            }
                        }
                    }
                }
                true
            })
            .map_err(FetchError::Curl)?;
        transfer
            .write_function(move |data| {
                if cancel.is_cancelled() {
                    // Short write aborts the transfer promptly.
                    return Ok(0);
                }
                let code = status_body.load(Ordering::Relaxed);
                if code != 200 && code != 206 {
                    // Error body (e.g. a 503 page); never write it to disk.
                    return Ok(0);
                }
                let off = offset.fetch_add(data.len() as u64, Ordering::Relaxed);
                match storage.write_at(current_start + off, data) {
                    Ok(()) => {
                        part.add_downloaded(data.len() as u64);
                        Ok(data.len())
                    }
                    Err(e) => {
                        let io_err = e
                            .downcast::<io::Error>()
                            .unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e.to_string()));
                        let _ = storage_error_cb.lock().unwrap().replace(io_err);
                        Ok(0)
                    }
                }
            })
            .map_err(FetchError::Curl)?;

        if let Err(e) = transfer.perform() {
            if e.is_write_error() {
                if let Some(io_err) = storage_error.lock().unwrap().take() {
                    return Err(FetchError::Storage(io_err));
                }
                // Aborted by the callback (cancel or bad status); fall through
                // to the status check so the cause is classified.
            } else {
                return Err(FetchError::Curl(e));
            }
        }
    }

    let code = easy.response_code().map_err(FetchError::Curl)? as u32;
    if code != 200 && code != 206 {
        return Err(FetchError::Http(code));
    }
    Ok(())
}

/// Sleep in short slices so cancellation interrupts the backoff.
/// Returns false if cancelled.
fn sleep_cancellable(total: Duration, cancel: &CancelToken) -> bool {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    !cancel.is_cancelled()
}
