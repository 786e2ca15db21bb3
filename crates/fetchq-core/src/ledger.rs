//! Relational download ledger.
//!
//! Long-term record keeping for listing and statistics. The ledger is
//! advisory: the queue's status entry is authoritative for live state,
//! and ledger write failures never fail a job once processing has begun.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

use crate::queue::{Job, JobState};
use crate::{path_to_sqlite_uri, unix_timestamp};

/// One row of the ledger.
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub job_id: String,
    pub url: String,
    pub output_path: String,
    pub threads: u32,
    pub state: JobState,
    pub bytes_downloaded: i64,
    pub total_bytes: i64,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The three calls a worker makes, plus the read used to enrich status
/// responses. Injected so deployments can point it at their own database.
#[async_trait]
pub trait DownloadLedger: Send + Sync {
    /// Create the row when processing begins.
    async fn create(&self, job: &Job) -> Result<()>;

    /// Periodic progress update (roughly every 3 seconds).
    async fn update_progress(&self, job_id: &str, bytes_downloaded: i64, total_bytes: i64)
        -> Result<()>;

    /// Record the terminal state.
    async fn finish(&self, job_id: &str, state: JobState, error_message: Option<&str>)
        -> Result<()>;

    /// Read one row, if present.
    async fn get(&self, job_id: &str) -> Result<Option<LedgerRow>>;
}

/// SQLite-backed ledger.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: Pool<Sqlite>,
}

impl SqliteLedger {
    /// Open (or create) the ledger under the XDG state directory:
    /// `~/.local/state/fetchq/ledger.db`.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
        let db_path = xdg_dirs.get_state_home().join("ledger.db");
        Self::open_at(&db_path).await
    }

    /// Open (or create) the ledger at a specific path. Creates parent dirs.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let ledger = SqliteLedger { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// In-memory ledger for tests.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let ledger = SqliteLedger { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                job_id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                output_path TEXT NOT NULL,
                threads INTEGER NOT NULL,
                state TEXT NOT NULL,
                bytes_downloaded INTEGER NOT NULL DEFAULT 0,
                total_bytes INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn state_from_str(s: &str) -> JobState {
    match s {
        "queued" => JobState::Queued,
        "processing" => JobState::Processing,
        "completed" => JobState::Completed,
        _ => JobState::Failed,
    }
}

#[async_trait]
impl DownloadLedger for SqliteLedger {
    async fn create(&self, job: &Job) -> Result<()> {
        let now = unix_timestamp();
        // Re-dispatched jobs hit the same primary key; keep the original
        // row and just flip it back to processing.
        sqlx::query(
            r#"
            INSERT INTO downloads (
                job_id, url, output_path, threads, state,
                bytes_downloaded, total_bytes, error_message,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'processing', 0, 0, NULL, ?5, ?5)
            ON CONFLICT(job_id) DO UPDATE SET
                state = 'processing',
                error_message = NULL,
                updated_at = ?5
            "#,
        )
        .bind(&job.id)
        .bind(&job.url)
        .bind(&job.output_path)
        .bind(job.threads as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(
        &self,
        job_id: &str,
        bytes_downloaded: i64,
        total_bytes: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET bytes_downloaded = ?1,
                total_bytes = ?2,
                updated_at = ?3
            WHERE job_id = ?4
            "#,
        )
        .bind(bytes_downloaded)
        .bind(total_bytes)
        .bind(unix_timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(
        &self,
        job_id: &str,
        state: JobState,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET state = ?1,
                error_message = ?2,
                updated_at = ?3
            WHERE job_id = ?4
            "#,
        )
        .bind(state.as_str())
        .bind(error_message)
        .bind(unix_timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<LedgerRow>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, url, output_path, threads, state,
                   bytes_downloaded, total_bytes, error_message,
                   created_at, updated_at
            FROM downloads
            WHERE job_id = ?1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| LedgerRow {
            job_id: r.get("job_id"),
            url: r.get("url"),
            output_path: r.get("output_path"),
            threads: r.get::<i64, _>("threads") as u32,
            state: state_from_str(r.get("state")),
            bytes_downloaded: r.get("bytes_downloaded"),
            total_bytes: r.get("total_bytes"),
            error_message: r.get("error_message"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }
}
