//! Refresh-scheduler integration tests: periodic reconciliation and the
//! store-driven engine-config watch.

mod common;

use common::{build_engine, group_spec, node, wait_for};
use stevedore::domain::models::RunState;
use stevedore::domain::ports::store::StoreExt;
use stevedore::EngineConfig;

#[tokio::test]
async fn test_periodic_refresh_recreates_vanished_instance() {
    let (engine, cluster, _store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;
    engine
        .new_pod_group(group_spec("web", 1, 256_000_000))
        .await
        .unwrap();
    wait_for(
        || async {
            engine
                .inspect_pod_group("web")
                .await
                .map(|b| b.pod_group.state == RunState::Running)
                .unwrap_or(false)
        },
        2_000,
    )
    .await;
    let old_id = engine.inspect_pod_group("web").await.unwrap().pod_group.pods[0]
        .container_id
        .clone();

    // The container vanishes without any event; only the refresh tick
    // notices.
    use stevedore::domain::ports::cluster::Cluster;
    cluster.remove_container(&old_id).await.unwrap();

    let recreated = wait_for(
        || async {
            let containers = cluster.containers().await;
            containers.len() == 1 && containers[0].running && containers[0].id != old_id
        },
        3_000,
    )
    .await;
    assert!(recreated, "refresh wave never recreated the vanished instance");
    engine.stop();
}

#[tokio::test]
async fn test_engine_config_follows_store_writes() {
    let (engine, _cluster, store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;
    assert!(!engine.read_only().await);

    // Re-assert the write each poll: the watch task registers its
    // watcher asynchronously during construction.
    let applied = wait_for(
        || async {
            store
                .set(
                    "/lain/deployd/config",
                    &EngineConfig {
                        read_only: false,
                        maintenance: true,
                    },
                    true,
                )
                .await
                .unwrap();
            engine.read_only().await
        },
        2_000,
    )
    .await;
    assert!(applied, "maintenance flag from the store never applied");
    engine.stop();
}
