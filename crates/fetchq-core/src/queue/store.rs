//! The list-store abstraction the queue runs on.
//!
//! The store must offer atomic list operations and key/value entries with
//! expiry. The queue never touches a concrete backend directly; workers
//! and the CLI inject a handle (see `SqliteListStore`).

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Atomic list + key/value primitives.
///
/// List order convention: `push_head` prepends, `move_tail_to_head` pops
/// the oldest entry, so lists drain FIFO. `payload` strings are opaque to
/// the store and compared byte-for-byte by the `*_exact` operations.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Prepend `payload` to `list`.
    async fn push_head(&self, list: &str, payload: &str) -> Result<()>;

    /// Atomically pop the tail of `src` and push it onto the head of `dst`.
    /// The two halves commit together: a crash can never lose the entry
    /// between them. Blocks up to `wait` when `src` is empty, then returns
    /// `None`.
    async fn move_tail_to_head(&self, src: &str, dst: &str, wait: Duration)
        -> Result<Option<String>>;

    /// Atomically replace the first entry of `list` equal to `old` with
    /// `new`, in place. Returns false when no entry matched.
    async fn replace_exact(&self, list: &str, old: &str, new: &str) -> Result<bool>;

    /// Remove the first entry of `list` equal to `payload`. Returns false
    /// when no entry matched.
    async fn remove_exact(&self, list: &str, payload: &str) -> Result<bool>;

    /// All entries of `list`, oldest first.
    async fn list_range(&self, list: &str) -> Result<Vec<String>>;

    async fn list_len(&self, list: &str) -> Result<i64>;

    /// Set `key` to `value`, expiring after `ttl`.
    async fn kv_set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Read `key`; expired or absent keys are `None`.
    async fn kv_get(&self, key: &str) -> Result<Option<String>>;
}
