//! Engine lifecycle integration tests: deploy-and-refresh, name
//! uniqueness, start/stop idempotence, and crash-recovery reload.

mod common;

use common::{build_engine, group_spec, node, wait_for};
use stevedore::domain::models::{Dependency, RunState};
use stevedore::{EngineOptions, OrcEngine, OrcError};

#[tokio::test]
async fn test_deploy_and_refresh_reaches_running() {
    let (engine, cluster, _store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;

    engine
        .new_pod_group(group_spec("web", 2, 256_000_000))
        .await
        .unwrap();

    let deployed = wait_for(
        || async {
            match engine.inspect_pod_group("web").await {
                Ok(bundle) => {
                    bundle.pod_group.pods.len() == 2 && bundle.pod_group.state == RunState::Running
                }
                Err(_) => false,
            }
        },
        2_000,
    )
    .await;
    assert!(deployed, "pod group never reached Running");

    let containers = cluster.containers().await;
    assert_eq!(containers.len(), 2);
    assert!(containers.iter().all(|c| c.running));
    assert!(containers.iter().all(|c| c.node_name == "node-1"));
    engine.stop();
}

#[tokio::test]
async fn test_duplicate_name_rejected_and_cleaning_guard() {
    let (engine, _cluster, _store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;

    engine
        .new_pod_group(group_spec("web", 2, 256_000_000))
        .await
        .unwrap();
    assert!(matches!(
        engine.new_pod_group(group_spec("web", 2, 256_000_000)).await,
        Err(OrcError::PodGroupExists)
    ));

    // The deploy holds the operation lock briefly; retry until the
    // removal claims it.
    let removed = wait_for(
        || async { engine.remove_pod_group("web").await.is_ok() },
        2_000,
    )
    .await;
    assert!(removed, "remove never claimed the operation lock");
    // The removal is still confirming against the cluster; re-creating
    // the same name must be refused until the janitor clears it.
    assert!(matches!(
        engine.new_pod_group(group_spec("web", 2, 256_000_000)).await,
        Err(OrcError::PodGroupCleaning)
    ));

    // While removing, the group stays observable.
    assert!(engine.inspect_pod_group("web").await.is_ok());

    let cleaned = wait_for(
        || async { engine.inspect_pod_group("web").await.is_err() },
        2_000,
    )
    .await;
    assert!(cleaned, "removing registry never drained");

    engine.new_pod_group(group_spec("web", 2, 256_000_000)).await.unwrap();
    engine.stop();
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (engine, cluster, _store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;

    assert!(engine.started());
    engine.start();
    assert!(engine.started());

    engine.stop();
    assert!(!engine.started());
    engine.stop();
    assert!(!engine.started());

    // A restarted engine processes operations with the same queue.
    engine.start();
    assert!(engine.started());
    engine
        .new_pod_group(group_spec("api", 1, 128_000_000))
        .await
        .unwrap();
    let deployed = wait_for(|| async { cluster.created_count() >= 1 }, 2_000).await;
    assert!(deployed, "restarted worker never processed the deploy");
    engine.stop();
}

#[tokio::test]
async fn test_reload_from_store_matches_live_registry() {
    let (engine, cluster, store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;
    let mut spec = group_spec("web", 2, 256_000_000);
    spec.pod.dependencies = vec![Dependency { pod_name: "portal".to_string() }];
    engine.new_pod_group(spec).await.unwrap();

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
    let live = engine.inspect_pod_group("web").await.unwrap();
    engine.stop();

    let reloaded_engine = OrcEngine::new(
        cluster.clone(),
        store.clone(),
        EngineOptions {
            config: Default::default(),
            timings: common::fast_timings(),
        },
    )
    .await
    .unwrap();
    let reloaded = reloaded_engine.inspect_pod_group("web").await.unwrap();

    assert_eq!(reloaded.spec, live.spec);
    assert_eq!(reloaded.prev_state, live.prev_state);
    assert_eq!(
        reloaded.pod_group.pods.iter().map(|p| &p.container_id).collect::<Vec<_>>(),
        live.pod_group.pods.iter().map(|p| &p.container_id).collect::<Vec<_>>(),
    );
    reloaded_engine.stop();
}
