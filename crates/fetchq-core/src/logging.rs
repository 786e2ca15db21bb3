//! Logging init: file under the XDG state dir, stderr as fallback.
//!
//! Workers are long-running background processes, so the default sink is
//! an append-only log file; the CLI falls back to stderr when the state
//! directory is unwritable.

use anyhow::{Context, Result};
use std::fs;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fetchq=debug"))
}

/// Initialize structured logging to `~/.local/state/fetchq/fetchq.log`.
/// Returns Err when the log file cannot be opened so the caller can fall
/// back to `init_logging_stderr`.
pub fn init_logging() -> Result<()> {
    let state_dir = xdg::BaseDirectories::with_prefix("fetchq")?.get_state_home();
    fs::create_dir_all(&state_dir)
        .with_context(|| format!("create state dir {}", state_dir.display()))?;

    let log_path = state_dir.join("fetchq.log");
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .init();

    tracing::info!("fetchq logging initialized at {}", log_path.display());
    Ok(())
}

/// Log to stderr only. Used when the file sink is unavailable.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
