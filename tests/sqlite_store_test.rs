//! SqliteStore adapter tests against a temp-file database.

use std::time::Duration;

use stevedore::adapters::SqliteStore;
use stevedore::domain::ports::store::{Store, StoreError, StoreExt};

async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite:{}", dir.path().join("store.db").display());
    let store = SqliteStore::connect(&url).await.expect("sqlite store");
    (dir, store)
}

#[tokio::test]
async fn test_set_get_round_trip_survives_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite:{}", dir.path().join("store.db").display());
    {
        let store = SqliteStore::connect(&url).await.unwrap();
        store
            .set("/lain/deployd/podgroup/prod/web", &serde_json::json!({"n": 2}), false)
            .await
            .unwrap();
    }
    let store = SqliteStore::connect(&url).await.unwrap();
    let value: serde_json::Value = store.get("/lain/deployd/podgroup/prod/web").await.unwrap();
    assert_eq!(value["n"], 2);
}

#[tokio::test]
async fn test_keys_by_prefix_and_error_kinds() {
    let (_dir, store) = temp_store().await;
    store.set("/pg/prod/web", &1u32, false).await.unwrap();
    store.set("/pg/prod/api", &1u32, false).await.unwrap();

    let names = store.keys_by_prefix("/pg/prod").await.unwrap();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"/pg/prod/web".to_string()));

    assert!(matches!(
        store.keys_by_prefix("/pg/prod/web").await,
        Err(StoreError::NonDirNode)
    ));
    assert!(matches!(
        store.keys_by_prefix("/nope").await,
        Err(StoreError::Missing)
    ));
    assert!(matches!(store.get_raw("/pg/prod").await, Err(StoreError::DirNode)));
}

#[tokio::test]
async fn test_duplicate_writes_suppressed_until_forced() {
    let (_dir, store) = temp_store().await;
    store.set("/k", &serde_json::json!({"a": 1}), false).await.unwrap();

    let mut rx = store.watch("/k").await;
    // Identical payload: suppressed, nothing reaches the watcher.
    store.set("/k", &serde_json::json!({"a": 1}), false).await.unwrap();
    assert!(rx.try_recv().is_err());

    // Forced: the write happens and the watcher sees it.
    store.set("/k", &serde_json::json!({"a": 1}), true).await.unwrap();
    let seen = rx.recv().await.unwrap();
    assert!(seen.contains("\"a\":1"));
}

#[tokio::test]
async fn test_ttl_value_expires() {
    let (_dir, store) = temp_store().await;
    store
        .set_with_ttl("/lease", &"holder", Duration::from_secs(1), false)
        .await
        .unwrap();
    assert!(store.get_raw("/lease").await.is_ok());
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(matches!(store.get_raw("/lease").await, Err(StoreError::Missing)));
}

#[tokio::test]
async fn test_remove_dir_clears_subtree() {
    let (_dir, store) = temp_store().await;
    store.set("/pg/prod/web", &1u32, false).await.unwrap();
    store.set("/pg/prod/api", &1u32, false).await.unwrap();
    store.remove_dir("/pg/prod").await.unwrap();
    assert!(matches!(store.get_raw("/pg/prod/web").await, Err(StoreError::Missing)));
    assert!(matches!(store.remove_dir("/pg/prod").await, Err(StoreError::Missing)));
}
