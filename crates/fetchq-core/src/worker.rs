//! Long-running worker: reserve a job, drive the engine, report the result.
//!
//! State machine per iteration: idle -> reserving -> running -> reporting,
//! with stopping reachable from anywhere via the shutdown token. The
//! blocking engine runs on a `spawn_blocking` thread; a panic there is
//! caught at the join point and converted to a job failure, so one bad
//! transfer never takes the worker down.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::control::CancelToken;
use crate::engine::{self, Outcome, ProgressObservation};
use crate::ledger::DownloadLedger;
use crate::queue::{Job, JobQueue, JobState, RESERVE_WAIT};

/// Tunables for the worker loop. Defaults are the production cadence;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Passed to the store's blocking reserve.
    pub reserve_wait: Duration,
    /// How often progress observations are forwarded to queue and ledger.
    pub progress_interval: Duration,
    /// Cadence of the orphan-reclamation sweeper.
    pub sweep_interval: Duration,
    /// Backoff after a queue-store error.
    pub store_retry_delay: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            reserve_wait: RESERVE_WAIT,
            progress_interval: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(5 * 60),
            store_retry_delay: Duration::from_secs(5),
        }
    }
}

/// One worker. Identified by an opaque uuid assigned at construction.
pub struct Worker {
    id: String,
    queue: JobQueue,
    ledger: Arc<dyn DownloadLedger>,
    options: WorkerOptions,
    shutdown: CancelToken,
}

impl Worker {
    pub fn new(
        queue: JobQueue,
        ledger: Arc<dyn DownloadLedger>,
        options: WorkerOptions,
        shutdown: CancelToken,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            queue,
            ledger,
            options,
            shutdown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reserve-and-process until shutdown. Store errors back off and retry;
    /// job errors are reported through the queue and never end the loop.
    pub async fn run(self) {
        tracing::info!(worker_id = %self.id, "worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self
                .queue
                .reserve(&self.id, self.options.reserve_wait)
                .await
            {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "reserve failed, backing off");
                    tokio::time::sleep(self.options.store_retry_delay).await;
                }
            }
        }
        tracing::info!(worker_id = %self.id, "worker stopped");
    }

    async fn process(&self, job: Job) {
        tracing::info!(
            worker_id = %self.id,
            job_id = %job.id,
            url = %job.url,
            output_path = %job.output_path,
            threads = job.threads,
            "processing job"
        );

        if let Err(e) = self.ledger.create(&job).await {
            let msg = format!("failed to create ledger record: {e:#}");
            tracing::error!(job_id = %job.id, error = %e, "ledger create failed");
            self.report_failure(&job.id, &msg).await;
            return;
        }

        let cancel = CancelToken::new();
        let (obs_tx, obs_rx) = tokio::sync::watch::channel(ProgressObservation::default());

        // Relay shutdown into this run's cancellation token.
        let propagate = tokio::spawn({
            let shutdown = self.shutdown.clone();
            let cancel = cancel.clone();
            async move {
                while !shutdown.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                cancel.cancel();
            }
        });

        let forwarder = tokio::spawn(forward_progress(
            self.queue.clone(),
            Arc::clone(&self.ledger),
            job.id.clone(),
            obs_rx.clone(),
            self.options.progress_interval,
        ));

        let engine_job = job.clone();
        let engine_cancel = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            engine::execute(
                &engine_job.url,
                &engine_job.output_path,
                engine_job.threads,
                &engine_cancel,
                Some(&obs_tx),
            )
        })
        .await;

        propagate.abort();
        forwarder.abort();

        match result {
            Ok(Ok(Outcome::Success)) => {
                let last = obs_rx.borrow().clone();
                if let Err(e) = self
                    .queue
                    .update_progress(&job.id, 100.0, last.total_bytes as i64, last.total_bytes as i64)
                    .await
                {
                    tracing::warn!(job_id = %job.id, error = %e, "final progress update failed");
                }
                if let Err(e) = self.queue.complete(&job.id).await {
                    tracing::warn!(job_id = %job.id, error = %e, "failed to mark job completed");
                }
                if let Err(e) = self
                    .ledger
                    .finish(&job.id, JobState::Completed, None)
                    .await
                {
                    tracing::warn!(job_id = %job.id, error = %e, "ledger completion update failed");
                }
                tracing::info!(worker_id = %self.id, job_id = %job.id, "job completed");
            }
            Ok(Ok(Outcome::Incomplete)) => {
                if self.shutdown.is_cancelled() {
                    // Cancelled, not failed: leave the reservation in place
                    // so the sweeper returns the job to pending and another
                    // worker resumes it from the progress file.
                    tracing::info!(
                        worker_id = %self.id,
                        job_id = %job.id,
                        "shutdown interrupted transfer, leaving job for reclamation"
                    );
                } else {
                    self.report_failure(&job.id, "download incomplete: output failed verification")
                        .await;
                }
            }
            Ok(Err(e)) => {
                self.report_failure(&job.id, &format!("download failed: {e:#}")).await;
            }
            Err(join_err) => {
                let msg = if join_err.is_panic() {
                    "download engine panicked".to_string()
                } else {
                    format!("download task aborted: {join_err}")
                };
                self.report_failure(&job.id, &msg).await;
            }
        }
    }

    async fn report_failure(&self, job_id: &str, message: &str) {
        if let Err(e) = self.queue.fail(job_id, message).await {
            tracing::warn!(job_id, error = %e, "failed to mark job failed");
        }
        if let Err(e) = self
            .ledger
            .finish(job_id, JobState::Failed, Some(message))
            .await
        {
            tracing::warn!(job_id, error = %e, "ledger failure update failed");
        }
    }
}

/// Forward the engine's observations to queue and ledger on a fixed cadence.
/// Exits when the engine drops its sender.
async fn forward_progress(
    queue: JobQueue,
    ledger: Arc<dyn DownloadLedger>,
    job_id: String,
    mut rx: tokio::sync::watch::Receiver<ProgressObservation>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match rx.has_changed() {
            Ok(true) => {
                let obs = rx.borrow_and_update().clone();
                if let Err(e) = queue
                    .update_progress(
                        &job_id,
                        obs.percent,
                        obs.bytes_downloaded as i64,
                        obs.total_bytes as i64,
                    )
                    .await
                {
                    tracing::warn!(job_id, error = %e, "queue progress update failed");
                }
                if let Err(e) = ledger
                    .update_progress(&job_id, obs.bytes_downloaded as i64, obs.total_bytes as i64)
                    .await
                {
                    tracing::warn!(job_id, error = %e, "ledger progress update failed");
                }
            }
            Ok(false) => {}
            Err(_) => break,
        }
    }
}

/// Run the orphan sweeper until shutdown. Any worker process runs one of
/// these; the operation is idempotent across the fleet.
pub async fn run_sweeper(queue: JobQueue, interval: Duration, shutdown: CancelToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a fresh worker doesn't
    // sweep before its own first reservation.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if shutdown.is_cancelled() {
                    break;
                }
                if let Err(e) = queue.reclaim_orphans().await {
                    tracing::error!(error = %e, "orphan reclamation failed");
                }
            }
            _ = wait_cancelled(&shutdown) => break,
        }
    }
}

async fn wait_cancelled(token: &CancelToken) {
    while !token.is_cancelled() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// A fleet of workers in one process, plus one sweeper. Mirrors a single
/// deployment unit: `run` resolves when shutdown is signalled and every
/// worker has finished its in-flight job handling.
pub struct WorkerPool {
    queue: JobQueue,
    ledger: Arc<dyn DownloadLedger>,
    options: WorkerOptions,
    shutdown: CancelToken,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, ledger: Arc<dyn DownloadLedger>, options: WorkerOptions) -> Self {
        Self {
            queue,
            ledger,
            options,
            shutdown: CancelToken::new(),
        }
    }

    /// Token the host uses to request a graceful stop.
    pub fn shutdown_token(&self) -> CancelToken {
        self.shutdown.clone()
    }

    pub async fn run(&self, worker_count: usize) -> Result<()> {
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..worker_count.max(1) {
            let worker = Worker::new(
                self.queue.clone(),
                Arc::clone(&self.ledger),
                self.options.clone(),
                self.shutdown.clone(),
            );
            tracing::info!(worker_id = %worker.id(), "starting worker");
            tasks.spawn(worker.run());
        }
        tasks.spawn(run_sweeper(
            self.queue.clone(),
            self.options.sweep_interval,
            self.shutdown.clone(),
        ));

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
        Ok(())
    }
}
