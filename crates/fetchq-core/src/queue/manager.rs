//! Queue protocol: enqueue, reserve, terminal transitions, orphan reclaim.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use super::store::ListStore;
use super::types::{Job, JobState, JobStatus};
use super::{
    status_key, COMPLETED_LIST, FAILED_LIST, IN_FLIGHT_LIST, PENDING_LIST, PROCESSING_TIMEOUT,
    STATUS_TTL,
};
use crate::unix_timestamp;

/// Lengths of the four queue lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub in_flight: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.in_flight + self.completed + self.failed
    }
}

/// Job queue over an injected list-store handle. Cloneable; every worker
/// in the fleet talks to the same store.
#[derive(Clone)]
pub struct JobQueue {
    pub(super) store: Arc<dyn ListStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self { store }
    }

    /// Push a job onto `pending` and write its initial status entry.
    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(job).context("serialize job")?;
        self.store
            .push_head(PENDING_LIST, &payload)
            .await
            .context("enqueue job")?;
        if let Err(e) = self.set_status(&JobStatus::queued(job)).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to set initial job status");
        }
        tracing::info!(job_id = %job.id, url = %job.url, threads = job.threads, "job enqueued");
        Ok(())
    }

    /// Atomically move the oldest pending job to `in_flight` and stamp it
    /// with this worker's identity. Blocks up to `wait`; `None` means the
    /// queue stayed empty.
    ///
    /// The stamped form replaces the in-flight entry in place so the
    /// sweeper can age it. If a crash lands between move and stamp, the
    /// entry is left unstamped and counts as immediately stale, which
    /// re-dispatches it: at-least-once either way.
    pub async fn reserve(&self, worker_id: &str, wait: Duration) -> Result<Option<Job>> {
        let Some(raw) = self
            .store
            .move_tail_to_head(PENDING_LIST, IN_FLIGHT_LIST, wait)
            .await
            .context("reserve job")?
        else {
            return Ok(None);
        };

        let mut job: Job = match serde_json::from_str(&raw) {
            Ok(j) => j,
            Err(e) => {
                // A payload we cannot parse is unprocessable; park it in
                // `failed` so it stops cycling through reservation.
                let _ = self.store.remove_exact(IN_FLIGHT_LIST, &raw).await;
                let _ = self.store.push_head(FAILED_LIST, &raw).await;
                anyhow::bail!("unparseable job payload moved to failed list: {e}");
            }
        };

        job.started_at = Some(unix_timestamp());
        job.worker_id = Some(worker_id.to_string());
        let stamped = serde_json::to_string(&job).context("serialize reserved job")?;
        if !self
            .store
            .replace_exact(IN_FLIGHT_LIST, &raw, &stamped)
            .await?
        {
            tracing::warn!(job_id = %job.id, "reserved entry vanished before stamping");
        }

        let status = JobStatus {
            state: JobState::Processing,
            started_at: job.started_at,
            worker_id: job.worker_id.clone(),
            ..JobStatus::queued(&job)
        };
        if let Err(e) = self.set_status(&status).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to set processing status");
        }

        tracing::info!(job_id = %job.id, worker_id, url = %job.url, "job reserved");
        Ok(Some(job))
    }

    /// Remove the job from `in_flight` and mark its status completed.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        match self.take_in_flight(job_id).await? {
            Some(raw) => self.store.push_head(COMPLETED_LIST, &raw).await?,
            None => tracing::warn!(job_id, "completed job not found in in_flight list"),
        }

        let mut status = self.status_or_default(job_id).await;
        status.state = JobState::Completed;
        status.progress = 100.0;
        status.completed_at = Some(unix_timestamp());
        status.error_message = None;
        self.set_status(&status).await?;
        tracing::info!(job_id, "job completed");
        Ok(())
    }

    /// Remove the job from `in_flight` and mark its status failed.
    pub async fn fail(&self, job_id: &str, message: &str) -> Result<()> {
        match self.take_in_flight(job_id).await? {
            Some(raw) => self.store.push_head(FAILED_LIST, &raw).await?,
            None => tracing::warn!(job_id, "failed job not found in in_flight list"),
        }

        let mut status = self.status_or_default(job_id).await;
        status.state = JobState::Failed;
        status.completed_at = Some(unix_timestamp());
        status.error_message = Some(message.to_string());
        self.set_status(&status).await?;
        tracing::error!(job_id, error = message, "job failed");
        Ok(())
    }

    /// Read-modify-write the progress fields, preserving everything else.
    /// A missing status entry is recreated in `processing`.
    pub async fn update_progress(
        &self,
        job_id: &str,
        percent: f64,
        bytes_downloaded: i64,
        total_bytes: i64,
    ) -> Result<()> {
        let mut status = self.status_or_default(job_id).await;
        status.progress = percent;
        status.bytes_downloaded = bytes_downloaded;
        status.total_bytes = total_bytes;
        self.set_status(&status).await
    }

    /// The job's current status entry, or `None` once the TTL has expired
    /// (or the id never existed).
    pub async fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        let Some(raw) = self.store.kv_get(&status_key(job_id)).await? else {
            return Ok(None);
        };
        let status = serde_json::from_str(&raw)
            .with_context(|| format!("unparseable status entry for job {job_id}"))?;
        Ok(Some(status))
    }

    /// Lengths of all four lists.
    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.store.list_len(PENDING_LIST).await?,
            in_flight: self.store.list_len(IN_FLIGHT_LIST).await?,
            completed: self.store.list_len(COMPLETED_LIST).await?,
            failed: self.store.list_len(FAILED_LIST).await?,
        })
    }

    /// Return every in-flight job older than `PROCESSING_TIMEOUT` to
    /// `pending`. Idempotent; any worker may run it on any schedule.
    pub async fn reclaim_orphans(&self) -> Result<u64> {
        self.reclaim_orphans_older_than(PROCESSING_TIMEOUT).await
    }

    /// Reclaim with an explicit stale threshold. An entry without a
    /// `started_at` stamp is treated as already stale.
    pub async fn reclaim_orphans_older_than(&self, threshold: Duration) -> Result<u64> {
        let now = unix_timestamp();
        let mut reclaimed = 0u64;

        for raw in self.store.list_range(IN_FLIGHT_LIST).await? {
            let mut job: Job = match serde_json::from_str(&raw) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable in_flight entry moved to failed list");
                    if self.store.remove_exact(IN_FLIGHT_LIST, &raw).await? {
                        self.store.push_head(FAILED_LIST, &raw).await?;
                    }
                    continue;
                }
            };

            let stale = match job.started_at {
                Some(started) => now.saturating_sub(started) >= threshold.as_secs() as i64,
                None => true,
            };
            if !stale {
                continue;
            }

            // Exact-payload removal: if another sweeper got here first the
            // remove misses and we skip, so a job is never requeued twice.
            if !self.store.remove_exact(IN_FLIGHT_LIST, &raw).await? {
                continue;
            }

            job.started_at = None;
            job.worker_id = None;
            let requeued = serde_json::to_string(&job).context("serialize reclaimed job")?;
            self.store.push_head(PENDING_LIST, &requeued).await?;

            let mut status = self.status_or_default(&job.id).await;
            status.state = JobState::Queued;
            status.started_at = None;
            status.worker_id = None;
            if let Err(e) = self.set_status(&status).await {
                tracing::warn!(job_id = %job.id, error = %e, "failed to reset reclaimed status");
            }

            reclaimed += 1;
            tracing::info!(job_id = %job.id, "requeued orphaned job");
        }

        if reclaimed > 0 {
            tracing::info!(count = reclaimed, "orphan reclamation pass finished");
        }
        Ok(reclaimed)
    }

    async fn set_status(&self, status: &JobStatus) -> Result<()> {
        let raw = serde_json::to_string(status).context("serialize job status")?;
        self.store
            .kv_set(&status_key(&status.id), &raw, STATUS_TTL)
            .await
    }

    /// Current status, or a minimal `processing` one when the entry is
    /// missing (progress updates tolerate expiry).
    async fn status_or_default(&self, job_id: &str) -> JobStatus {
        match self.get_status(job_id).await {
            Ok(Some(status)) => status,
            _ => JobStatus {
                id: job_id.to_string(),
                state: JobState::Processing,
                progress: 0.0,
                bytes_downloaded: 0,
                total_bytes: 0,
                error_message: None,
                created_at: unix_timestamp(),
                started_at: None,
                completed_at: None,
                worker_id: None,
            },
        }
    }

    /// Find the in-flight entry for `job_id` (id-keyed, not byte-keyed, so
    /// re-stamped serializations still match) and remove it, returning the
    /// raw payload.
    async fn take_in_flight(&self, job_id: &str) -> Result<Option<String>> {
        for raw in self.store.list_range(IN_FLIGHT_LIST).await? {
            let parsed: Result<Job, _> = serde_json::from_str(&raw);
            if let Ok(job) = parsed {
                if job.id == job_id {
                    if self.store.remove_exact(IN_FLIGHT_LIST, &raw).await? {
                        return Ok(Some(raw));
                    }
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}
