//! In-process hierarchical key-value store.
//!
//! Backs tests and single-node deployments. Implements the same
//! directory-tree semantics a replicated backend exposes: value nodes,
//! directory listing of immediate children, recursive watches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

use crate::domain::ports::store::{Store, StoreError, StoreResult};

use super::hash_guard::HashGuard;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Entry>>,
    watchers: RwLock<Vec<Watcher>>,
    guard: HashGuard,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually reached the backing map. Suppressed
    /// no-op writes do not count.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn expired(entry: &Entry) -> bool {
        entry.expires_at.is_some_and(|at| at <= Instant::now())
    }

    fn watched_by(watcher_prefix: &str, key: &str) -> bool {
        key == watcher_prefix || key.starts_with(&format!("{watcher_prefix}/"))
    }

    async fn notify_watchers(&self, key: &str, value: &str) {
        let mut watchers = self.watchers.write().await;
        watchers.retain(|w| !w.tx.is_closed());
        for watcher in watchers.iter() {
            if Self::watched_by(&watcher.prefix, key) {
                // Slow consumers drop updates rather than stall writes.
                let _ = watcher.tx.try_send(value.to_string());
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_raw(&self, key: &str) -> StoreResult<String> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(entry) if !Self::expired(entry) => Ok(entry.value.clone()),
            _ => {
                let dir = format!("{key}/");
                if data.keys().any(|k| k.starts_with(&dir)) {
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
        let expires_at = ttl.map(|d| Instant::now() + d);
        {
            let mut data = self.data.write().await;
            data.insert(key.to_string(), Entry { value: value.clone(), expires_at });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.guard.commit(key, hash);
        self.notify_watchers(key, &value).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        self.guard.forget(key);
        match data.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::Missing),
        }
    }

    async fn remove_dir(&self, key: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        let dir = format!("{key}/");
        let before = data.len();
        data.retain(|k, _| k != key && !k.starts_with(&dir));
        self.guard.forget_prefix(key);
        if data.len() == before {
            return Err(StoreError::Missing);
        }
        Ok(())
    }

    async fn try_remove_dir(&self, key: &str) {
        let _ = self.remove_dir(key).await;
    }

    async fn keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let data = self.data.read().await;
        if data.contains_key(prefix) {
            return Err(StoreError::NonDirNode);
        }
        let dir = format!("{prefix}/");
        let mut children: Vec<String> = data
            .keys()
            .filter_map(|k| {
                let rest = k.strip_prefix(&dir)?;
                let child = rest.split('/').next()?;
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
