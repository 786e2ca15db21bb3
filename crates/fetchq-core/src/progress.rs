//! Progress store: durable snapshot of a transfer plan.
//!
//! One JSON file per transfer, written atomically (temp sibling + rename)
//! so a concurrent reader never observes a half-written document. The file
//! is the resume source of truth: a crashed transfer restarts from whatever
//! counters the last save captured.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::plan::{Plan, PlanSnapshot};

/// Derive the per-transfer progress file path from the output path.
/// Keeping it a sibling of the output means a re-dispatched job on any
/// worker sharing the filesystem finds the same state.
pub fn progress_path_for(output_path: &str) -> String {
    format!("{output_path}.progress.json")
}

/// Load the most recently persisted plan. Missing or corrupt files are
/// treated the same: there is no usable progress, start fresh.
pub fn load(path: &Path) -> Option<Plan> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return None,
    };
    match serde_json::from_str::<PlanSnapshot>(&data) {
        Ok(snap) => Some(Plan::from_snapshot(snap)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt progress file, starting fresh");
            None
        }
    }
}

/// Persist a point-in-time snapshot of the plan.
///
/// Writes pretty-printed JSON to `<path>.tmp`, fsyncs, then renames over
/// the destination. Mode 0644 on Unix.
pub fn save(path: &Path, plan: &Plan) -> Result<()> {
    let snap = plan.snapshot();
    let json = serde_json::to_string_pretty(&snap).context("serialize progress snapshot")?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("create temp progress file {}", tmp.display()))?;
        f.write_all(json.as_bytes())
            .context("write progress snapshot")?;
        f.sync_all().context("sync progress snapshot")?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename progress file into place at {}", path.display()))?;
    Ok(())
}

/// Remove the progress file after a verified transfer. Missing is fine.
pub fn delete(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove progress file");
        }
    }
}
