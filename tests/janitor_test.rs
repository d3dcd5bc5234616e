//! Removal-janitor integration tests: the pod-group hard timeout and the
//! dependency still-in-use abort path.

mod common;

use common::{build_engine, group_spec, node, wait_for};
use stevedore::domain::models::{ContainerSpec, Dependency, PodSpec, RunState};
use stevedore::OrcError;

fn portal_spec() -> PodSpec {
    PodSpec {
        name: "portal".to_string(),
        namespace: "prod".to_string(),
        containers: vec![ContainerSpec {
            image: "portal:latest".to_string(),
            memory_limit: 64_000_000,
            ..ContainerSpec::default()
        }],
        ..PodSpec::default()
    }
}

#[tokio::test]
async fn test_janitor_timeout_drops_entry_despite_leftovers() {
    let (engine, cluster, _store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;
    engine
        .new_pod_group(group_spec("web", 2, 256_000_000))
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

    // Every container removal fails, so the controller never confirms.
    cluster.set_fail_removes(true);
    let removed = wait_for(
        || async { engine.remove_pod_group("web").await.is_ok() },
        2_000,
    )
    .await;
    assert!(removed);

    // The janitor times out (300ms in test timings), drops the registry
    // entry anyway, and leaves the cluster for the operator.
    let name_free = wait_for(
        || async {
            engine
                .new_pod_group(group_spec("web", 2, 256_000_000))
                .await
                .is_ok()
        },
        2_000,
    )
    .await;
    assert!(name_free, "janitor timeout never freed the name");
    assert!(
        !cluster.containers().await.is_empty(),
        "partially-removed containers stay behind for manual reconciliation"
    );
    engine.stop();
}

#[tokio::test]
async fn test_depends_removal_aborts_while_referenced() {
    let (engine, _cluster, _store) = build_engine(vec![node("node-1", 4_000_000_000, 0)]).await;
    engine.new_dependency_pod(portal_spec()).await.unwrap();

    let mut spec = group_spec("web", 2, 256_000_000);
    spec.pod.dependencies = vec![Dependency { pod_name: "portal".to_string() }];
    engine.new_pod_group(spec).await.unwrap();

    // The deploy publishes Add events; the shared instance appears with
    // one reference per consumer instance on the node.
    let referenced = wait_for(
        || async {
            engine
                .get_dependency_pod("portal")
                .await
                .map(|pods| {
                    pods.get("prod")
                        .and_then(|nodes| nodes.get("node-1"))
                        .is_some_and(|shared| shared.refcount == 2)
                })
                .unwrap_or(false)
        },
        2_000,
    )
    .await;
    assert!(referenced, "dependency instance never picked up its references");

    engine.remove_dependency_pod("portal", false).await.unwrap();
    // Immediately gone from the active registry...
    assert!(matches!(
        engine.get_dependency_pod("portal").await,
        Err(OrcError::DependencyPodNotExists)
    ));
    // ...until the janitor sees InUse and puts it back.
    let restored = wait_for(
        || async { engine.get_dependency_pod("portal").await.is_ok() },
        2_000,
    )
    .await;
    assert!(restored, "in-use dependency was never returned to service");
    engine.stop();
}

#[tokio::test]
async fn test_depends_forced_removal_completes() {
    let (engine, cluster, _store) = build_engine(vec![node("node-1", 4_000_000_000, 0)]).await;
    engine.new_dependency_pod(portal_spec()).await.unwrap();

    let mut spec = group_spec("web", 1, 256_000_000);
    spec.pod.dependencies = vec![Dependency { pod_name: "portal".to_string() }];
    engine.new_pod_group(spec).await.unwrap();
    wait_for(
        || async {
            engine
                .get_dependency_pod("portal")
                .await
                .map(|pods| !pods.is_empty())
                .unwrap_or(false)
        },
        2_000,
    )
    .await;

    engine.remove_dependency_pod("portal", true).await.unwrap();
    // Once the janitor confirms, the name is free to register again.
    let name_free = wait_for(
        || async { engine.new_dependency_pod(portal_spec()).await.is_ok() },
        2_000,
    )
    .await;
    assert!(name_free, "forced removal never released the name");
    // Only pod-group containers remain.
    assert!(cluster
        .containers()
        .await
        .iter()
        .all(|c| !c.name.starts_with("portal.")));
    engine.stop();
}
