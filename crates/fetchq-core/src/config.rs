//! Global configuration loaded from `~/.config/fetchq/config.toml`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Process-level settings. Per-job tuning (thread count) comes from the
/// job itself; these are deployment knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchqConfig {
    /// Workers started by `fetchq work` when `--workers` is not given.
    pub worker_count: usize,
    /// Thread count applied to jobs enqueued without an explicit value.
    pub default_threads: u32,
    /// Queue list-store database; defaults to the XDG state dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_db: Option<PathBuf>,
    /// Relational ledger database; defaults to the XDG state dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_db: Option<PathBuf>,
}

impl Default for FetchqConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            default_threads: 4,
            queue_db: None,
            ledger_db: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FetchqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FetchqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: FetchqConfig = toml::from_str(&data)?;
    Ok(cfg)
}
