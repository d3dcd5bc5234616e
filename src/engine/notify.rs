//! Webhook notification controller.
//!
//! Callbacks are registered through the API and persisted to the store;
//! `send` fans a payload out to every callback on spawned tasks with
//! exponential-backoff retries, so alert delivery never blocks the
//! operation worker.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::NotifySpec;
use crate::domain::ports::store::{Store, StoreExt, StoreResult};

use super::keys;

const RECENT_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRecord {
    pub callback: String,
    pub created_at: DateTime<Utc>,
}

pub struct NotifyController {
    callbacks: RwLock<HashMap<String, NotifyRecord>>,
    http: reqwest::Client,
    recent: Mutex<Vec<NotifySpec>>,
}

impl Default for NotifyController {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyController {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
            recent: Mutex::new(Vec::new()),
        }
    }

    pub async fn load(&self, store: &dyn Store) -> StoreResult<()> {
        let keys = match store.keys_by_prefix(&keys::notify_dir()).await {
            Ok(keys) => keys,
            Err(err) if err.is_missing() => return Ok(()),
            Err(err) => return Err(err),
        };
        let mut loaded = HashMap::new();
        for key in keys {
            let record: NotifyRecord = store.get(&key).await?;
            loaded.insert(record.callback.clone(), record);
        }
        *self.callbacks.write().await = loaded;
        Ok(())
    }

    pub async fn callbacks(&self) -> Vec<String> {
        let mut list: Vec<String> = self.callbacks.read().await.keys().cloned().collect();
        list.sort();
        list
    }

    pub async fn contains(&self, callback: &str) -> bool {
        self.callbacks.read().await.contains_key(callback)
    }

    pub async fn add(&self, callback: &str, store: &dyn Store) -> StoreResult<()> {
        let record = NotifyRecord {
            callback: callback.to_string(),
            created_at: Utc::now(),
        };
        store.set(&keys::notify(callback), &record, false).await?;
        self.callbacks
            .write()
            .await
            .insert(callback.to_string(), record);
        Ok(())
    }

    pub async fn remove(&self, callback: &str, store: &dyn Store) -> StoreResult<()> {
        store.remove(&keys::notify(callback)).await?;
        self.callbacks.write().await.remove(callback);
        Ok(())
    }

    /// Recently sent payloads, oldest first. Inspection only.
    pub fn recent_sent(&self) -> Vec<NotifySpec> {
        self.recent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Fan the payload out to every registered callback.
    pub async fn send(&self, spec: NotifySpec) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            recent.push(spec.clone());
            if recent.len() > RECENT_CAP {
                let drop = recent.len() - RECENT_CAP;
                recent.drain(..drop);
            }
        }
        let targets = self.callbacks().await;
        debug!(code = %spec.code, targets = targets.len(), "sending notification");
        for callback in targets {
            let http = self.http.clone();
            let payload = spec.clone();
            tokio::spawn(async move {
                let policy = ExponentialBackoffBuilder::new()
                    .with_initial_interval(Duration::from_millis(500))
                    .with_max_elapsed_time(Some(Duration::from_secs(30)))
                    .build();
                let delivery = backoff::future::retry(policy, || {
                    let http = http.clone();
                    let callback = callback.clone();
                    let payload = payload.clone();
                    async move {
                        let resp = http
                            .post(&callback)
                            .json(&payload)
                            .send()
                            .await
                            .map_err(backoff::Error::transient)?;
                        resp.error_for_status().map_err(backoff::Error::transient)?;
                        Ok::<(), backoff::Error<reqwest::Error>>(())
                    }
                })
                .await;
                if let Err(err) = delivery {
                    warn!(%callback, %err, "giving up on notification delivery");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;

    #[tokio::test]
    async fn test_add_list_remove_round_trip() {
        let store = MemoryStore::new();
        let ctrl = NotifyController::new();
        ctrl.add("http://alerts.example.com/hook", &store).await.unwrap();
        assert!(ctrl.contains("http://alerts.example.com/hook").await);

        let reloaded = NotifyController::new();
        reloaded.load(&store).await.unwrap();
        assert_eq!(reloaded.callbacks().await.len(), 1);

        ctrl.remove("http://alerts.example.com/hook", &store).await.unwrap();
        assert!(!ctrl.contains("http://alerts.example.com/hook").await);
    }

    #[tokio::test]
    async fn test_send_records_recent_history() {
        let ctrl = NotifyController::new();
        ctrl.send(NotifySpec::cluster_unhealthy()).await;
        let recent = ctrl.recent_sent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].code, crate::domain::models::notify::NOTIFY_CLUSTER_UNHEALTHY);
    }
}
