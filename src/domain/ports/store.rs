//! Hierarchical key-value store port.
//!
//! Keys form a directory tree (`/lain/deployd/podgroup/<ns>/<name>`);
//! values are JSON strings. Adapters must suppress writes whose FNV-64a
//! payload hash equals the last value written for that key, unless the
//! caller forces the write: refresh ticks re-persist state every few
//! seconds and a replicated backend must not churn.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors a store adapter can report. `Missing` is a first-class
/// non-error for loaders: an empty collection is valid state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key missing")]
    Missing,

    #[error("nil node")]
    NilNode,

    #[error("directory node where a value was expected")]
    DirNode,

    #[error("value node where a directory was expected")]
    NonDirNode,

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Raw string-level store operations implemented by adapters.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the raw JSON payload under `key`.
    async fn get_raw(&self, key: &str) -> StoreResult<String>;

    /// Write `value` under `key`. When `force` is false the adapter must
    /// skip the write if the payload hash matches the last written value.
    /// `ttl` of `None` means the key persists until removed.
    async fn set_raw(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        force: bool,
    ) -> StoreResult<()>;

    /// Remove a single value node.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Remove a directory node and everything under it.
    async fn remove_dir(&self, key: &str) -> StoreResult<()>;

    /// `remove_dir` that swallows failures.
    async fn try_remove_dir(&self, key: &str);

    /// Immediate children of a directory key, as absolute keys.
    async fn keys_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Recursive watcher: yields each new value written under `key` as a
    /// string. Adapters reconnect automatically after backend errors
    /// (10-second backoff) and keep the channel alive indefinitely.
    async fn watch(&self, key: &str) -> mpsc::Receiver<String>;
}

/// Typed JSON convenience layer over any [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get<T>(&self, key: &str) -> StoreResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.get_raw(key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn set<T>(&self, key: &str, value: &T, force: bool) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw, None, force).await
    }

    async fn set_with_ttl<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        force: bool,
    ) -> StoreResult<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw, Some(ttl), force).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
