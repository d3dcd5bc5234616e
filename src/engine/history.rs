//! Per-instance container status history.
//!
//! `start`/`stop`/`die` events append to a bounded list in the store so
//! operators can see what a pod has been doing between inspections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ports::store::{Store, StoreExt, StoreResult};

use super::keys;

const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    pub node_name: String,
    pub container_id: String,
    pub timestamp: DateTime<Utc>,
}

pub async fn save_pod_status(
    store: &dyn Store,
    pg_name: &str,
    instance: usize,
    message: StatusMessage,
) -> StoreResult<()> {
    let key = keys::pod_history(pg_name, instance);
    let mut history: Vec<StatusMessage> = match store.get(&key).await {
        Ok(history) => history,
        Err(err) if err.is_missing() => Vec::new(),
        Err(err) => return Err(err),
    };
    history.push(message);
    if history.len() > MAX_HISTORY {
        let drop = history.len() - MAX_HISTORY;
        history.drain(..drop);
    }
    store.set(&key, &history, false).await
}

pub async fn fetch_pod_history(
    store: &dyn Store,
    pg_name: &str,
    instance: usize,
) -> Vec<StatusMessage> {
    match store.get(&keys::pod_history(pg_name, instance)).await {
        Ok(history) => history,
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;

    fn message(status: &str) -> StatusMessage {
        StatusMessage {
            status: status.to_string(),
            node_name: "node-1".to_string(),
            container_id: "c1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_history_appends_in_order() {
        let store = MemoryStore::new();
        save_pod_status(&store, "web", 1, message("start")).await.unwrap();
        save_pod_status(&store, "web", 1, message("stop")).await.unwrap();
        let history = fetch_pod_history(&store, "web", 1).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, "start");
        assert_eq!(history[1].status, "stop");
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = MemoryStore::new();
        for i in 0..(MAX_HISTORY + 10) {
            save_pod_status(&store, "web", 1, message(&format!("start-{i}"))).await.unwrap();
        }
        let history = fetch_pod_history(&store, "web", 1).await;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].status, "start-10");
    }

    #[tokio::test]
    async fn test_missing_history_is_empty() {
        let store = MemoryStore::new();
        assert!(fetch_pod_history(&store, "ghost", 1).await.is_empty());
    }
}
