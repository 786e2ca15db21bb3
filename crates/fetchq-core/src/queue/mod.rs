//! Distributed job queue over an external list-store.
//!
//! Jobs migrate between four lists (`pending` -> `in_flight` ->
//! `completed`/`failed`); reservation is the store's atomic tail-pop /
//! head-push, which gives at-least-once dispatch. A status entry per job
//! (`job_status:{id}`, 30-day TTL) stays readable after the job leaves
//! the lists.

mod manager;
mod sqlite;
mod store;
mod types;

#[cfg(test)]
mod tests;

pub use manager::{JobQueue, QueueStats};
pub use sqlite::SqliteListStore;
pub use store::ListStore;
pub use types::{Job, JobState, JobStatus};

use std::time::Duration;

/// List of serialized jobs awaiting a worker.
pub const PENDING_LIST: &str = "pending";
/// Jobs currently reserved by a worker.
pub const IN_FLIGHT_LIST: &str = "in_flight";
/// Terminal list, kept for statistics only.
pub const COMPLETED_LIST: &str = "completed";
/// Terminal list, kept for statistics only.
pub const FAILED_LIST: &str = "failed";

/// Age past which an in-flight job is considered orphaned.
pub const PROCESSING_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// How long a blocking reserve waits before reporting an empty queue.
pub const RESERVE_WAIT: Duration = Duration::from_secs(10);
/// Status entries outlive the queue lists by at least this much.
pub const STATUS_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Key for a job's status entry.
pub fn status_key(job_id: &str) -> String {
    format!("job_status:{job_id}")
}
