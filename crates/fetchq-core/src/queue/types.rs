//! Job and status records exchanged through the list-store.

use serde::{Deserialize, Serialize};

use crate::unix_timestamp;

/// Bounds for a job's thread count; out-of-range requests are clamped.
pub const MIN_THREADS: u32 = 1;
pub const MAX_THREADS: u32 = 16;

/// A download request. Immutable once enqueued, except for the volatile
/// reservation fields stamped by `reserve` and cleared by reclamation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub output_path: String,
    pub threads: u32,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Job {
    /// Build a job with a fresh uuid. `threads` is clamped to `[1, 16]`.
    pub fn new(url: impl Into<String>, output_path: impl Into<String>, threads: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            output_path: output_path.into(),
            threads: threads.clamp(MIN_THREADS, MAX_THREADS),
            created_at: unix_timestamp(),
            started_at: None,
            worker_id: None,
        }
    }
}

/// Lifecycle state of a job. Transitions form a DAG
/// (queued -> processing -> completed | failed) with one back-edge:
/// orphan reclamation returns a processing job to queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Mutable progress view of a job, stored under `job_status:{id}`.
/// Authoritative for live state; the relational ledger is advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    #[serde(rename = "status")]
    pub state: JobState,
    pub progress: f64,
    pub bytes_downloaded: i64,
    pub total_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl JobStatus {
    /// Initial status written at enqueue time.
    pub fn queued(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            state: JobState::Queued,
            progress: 0.0,
            bytes_downloaded: 0,
            total_bytes: 0,
            error_message: None,
            created_at: job.created_at,
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }
}
