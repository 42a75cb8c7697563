//! Shared key-value store with per-key TTL.
//!
//! The dedup gate only needs `get` and `setex`. `MemoryStore` is process-local;
//! `SqliteStore` persists across restarts and can be shared by processes on the
//! same host.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::StoreError;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value for a live (unexpired) key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, expiring after `ttl`. Overwrites.
    async fn set_ex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError>;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process store. Expired keys are dropped lazily on read or by
/// `purge_expired`.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// SQLite-backed store. Calls run on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 2000;
             CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 expires_at_ms INTEGER NOT NULL
             );",
        )?;

        info!(
            component = "kv_store",
            event = "kv_store.sqlite_opened",
            path = %path.display(),
            "Opened sqlite key-value store"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv WHERE key = ?1 AND expires_at_ms > ?2",
                    params![key, now_ms()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok::<_, StoreError>(value)
        })
        .await?
    }

    async fn set_ex(&self, key: &str, ttl: Duration, value: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            let now = now_ms();
            let expires_at = now.saturating_add(ttl.as_millis() as i64);
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
                params![key, value, expires_at],
            )?;
            let purged = conn.execute("DELETE FROM kv WHERE expires_at_ms <= ?1", params![now])?;
            if purged > 0 {
                debug!(
                    component = "kv_store",
                    event = "kv_store.purged",
                    purged,
                    "Purged expired keys"
                );
            }
            Ok::<_, StoreError>(())
        })
        .await?
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_store_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set_ex("k", Duration::from_secs(30), "1")
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let store = MemoryStore::new();
        store.set_ex("short", Duration::from_secs(1), "1").await.unwrap();
        store.set_ex("long", Duration::from_secs(60), "1").await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.purge_expired(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_and_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("kv.db")).unwrap();

        store
            .set_ex("live", Duration::from_secs(30), "1")
            .await
            .unwrap();
        store.set_ex("dead", Duration::ZERO, "1").await.unwrap();

        assert_eq!(store.get("live").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("dead").await.unwrap(), None);
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set_ex("k", Duration::from_secs(30), "1")
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some("1"));
    }
}
