//! SQLite-backed list-store implementation.
//!
//! One `list_entries` table models every list: the monotonic rowid gives
//! list order (tail = smallest id), and SQLite transactions make the
//! pop-and-push of a reservation a single indivisible step. The blocking
//! wait of `move_tail_to_head` is emulated by polling.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::Duration;

use super::store::ListStore;
use crate::{path_to_sqlite_uri, unix_timestamp};

/// Poll cadence while waiting on an empty list.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to the SQLite list-store. Cloneable; all clones share one pool.
#[derive(Clone)]
pub struct SqliteListStore {
    pool: Pool<Sqlite>,
}

impl SqliteListStore {
    /// Open (or create) the store under the XDG state directory:
    /// `~/.local/state/fetchq/queue.db`.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
        let state_dir = xdg_dirs.get_state_home();
        let db_path = state_dir.join("queue.db");
        Self::open_at(&db_path).await
    }

    /// Open (or create) the store at a specific path. Creates parent dirs.
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
        let store = SqliteListStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests (single connection, no disk I/O).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteListStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS list_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_list_entries_list
            ON list_entries(list, id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One attempt at the atomic tail-pop / head-push.
    async fn try_move(&self, src: &str, dst: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT id, payload FROM list_entries
            WHERE list = ?1
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(src)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let id: i64 = row.get("id");
        let payload: String = row.get("payload");
        sqlx::query("DELETE FROM list_entries WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO list_entries (list, payload) VALUES (?1, ?2)")
            .bind(dst)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(payload))
    }
}

#[async_trait]
impl ListStore for SqliteListStore {
    async fn push_head(&self, list: &str, payload: &str) -> Result<()> {
        sqlx::query("INSERT INTO list_entries (list, payload) VALUES (?1, ?2)")
            .bind(list)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn move_tail_to_head(
        &self,
        src: &str,
        dst: &str,
        wait: Duration,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(payload) = self.try_move(src, dst).await? {
                return Ok(Some(payload));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    async fn replace_exact(&self, list: &str, old: &str, new: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT id FROM list_entries
            WHERE list = ?1 AND payload = ?2
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(list)
        .bind(old)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(false);
        };
        let id: i64 = row.get("id");
        sqlx::query("UPDATE list_entries SET payload = ?1 WHERE id = ?2")
            .bind(new)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn remove_exact(&self, list: &str, payload: &str) -> Result<bool> {
        let r = sqlx::query(
            r#"
            DELETE FROM list_entries
            WHERE id = (
                SELECT id FROM list_entries
                WHERE list = ?1 AND payload = ?2
                ORDER BY id ASC
                LIMIT 1
            )
            "#,
        )
        .bind(list)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    async fn list_range(&self, list: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT payload FROM list_entries
            WHERE list = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(list)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("payload")).collect())
    }

    async fn list_len(&self, list: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM list_entries WHERE list = ?1")
            .bind(list)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = unix_timestamp() + ttl.as_secs() as i64;
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: i64 = row.get("expires_at");
        if expires_at <= unix_timestamp() {
            // Lazy expiry, mirroring a TTL store.
            sqlx::query("DELETE FROM kv_entries WHERE key = ?1")
                .bind(key)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }
        Ok(Some(row.get("value")))
    }
}
