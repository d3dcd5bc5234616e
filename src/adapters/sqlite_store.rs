//! SQLite-backed store adapter.
//!
//! A single `kv` table holds the directory tree as flat keys. Suitable
//! for single-engine deployments and durable test fixtures; a replicated
//! backend plugs in behind the same [`Store`] port.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::{mpsc, RwLock};

use crate::domain::ports::store::{Store, StoreError, StoreResult};

use super::hash_guard::HashGuard;

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<String>,
}

pub struct SqliteStore {
    pool: SqlitePool,
    watchers: RwLock<Vec<Watcher>>,
    guard: HashGuard,
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl SqliteStore {
    /// Open (and create if needed) the database at `url`, e.g.
    /// `sqlite:/var/lib/stevedore/store.db`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(backend)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 expires_at INTEGER
             )",
        )
        .execute(&pool)
        .await
        .map_err(backend)?;
        Ok(Self {
            pool,
            watchers: RwLock::new(Vec::new()),
            guard: HashGuard::new(),
        })
    }

    fn watched_by(watcher_prefix: &str, key: &str) -> bool {
        key == watcher_prefix || key.starts_with(&format!("{watcher_prefix}/"))
    }

    async fn notify_watchers(&self, key: &str, value: &str) {
        let mut watchers = self.watchers.write().await;
        watchers.retain(|w| !w.tx.is_closed());
        for watcher in watchers.iter() {
            if Self::watched_by(&watcher.prefix, key) {
                let _ = watcher.tx.try_send(value.to_string());
            }
        }
    }

    async fn has_children(&self, key: &str) -> StoreResult<bool> {
        let dir = format!("{key}/%");
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv WHERE key LIKE ?1")
            .bind(&dir)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_raw(&self, key: &str) -> StoreResult<String> {
        let row = sqlx::query("SELECT value, expires_at FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let expires_at: Option<i64> = row.get("expires_at");
                if expires_at.is_some_and(|at| at <= Utc::now().timestamp()) {
                    let _ = sqlx::query("DELETE FROM kv WHERE key = ?1")
                        .bind(key)
                        .execute(&self.pool)
                        .await;
                    return Err(StoreError::Missing);
                }
                Ok(row.get("value"))
            }
            None => {
                if self.has_children(key).await? {
                    Err(StoreError::DirNode)
                } else {
                    Err(StoreError::Missing)
                }
            }
        }
    }

    async fn set_raw(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        force: bool,
    ) -> StoreResult<()> {
        let Some(hash) = self.guard.should_write(key, &value, force) else {
            return Ok(());
        };
        let expires_at = ttl.map(|d| Utc::now().timestamp() + d.as_secs() as i64);
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
        )
        .bind(key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        self.guard.commit(key, hash);
        self.notify_watchers(key, &value).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.guard.forget(key);
        let done = sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Missing);
        }
        Ok(())
    }

    async fn remove_dir(&self, key: &str) -> StoreResult<()> {
        self.guard.forget_prefix(key);
        let dir = format!("{key}/%");
        let done = sqlx::query("DELETE FROM kv WHERE key = ?1 OR key LIKE ?2")
            .bind(key)
            .bind(&dir)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Missing);
        }
        Ok(())
    }

    async fn try_remove_dir(&self, key: &str) {
        let _ = self.remove_dir(key).await;
    }

    async fn keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let exact = sqlx::query("SELECT 1 FROM kv WHERE key = ?1")
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        if exact.is_some() {
            return Err(StoreError::NonDirNode);
        }
        let dir = format!("{prefix}/%");
        let rows = sqlx::query("SELECT key FROM kv WHERE key LIKE ?1")
            .bind(&dir)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let cut = format!("{prefix}/");
        let mut children: Vec<String> = rows
            .iter()
            .filter_map(|row| {
                let key: String = row.get("key");
                let rest = key.strip_prefix(&cut)?.to_string();
                let child = rest.split('/').next()?.to_string();
                Some(format!("{prefix}/{child}"))
            })
            .collect();
        children.sort();
        children.dedup();
        if children.is_empty() {
            return Err(StoreError::Missing);
        }
        Ok(children)
    }

    async fn watch(&self, key: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let mut watchers = self.watchers.write().await;
        watchers.push(Watcher { prefix: key.to_string(), tx });
        rx
    }
}
