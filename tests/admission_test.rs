//! Admission-check integration tests for spec reschedules.

mod common;

use common::{build_engine, group_spec, node, wait_for};
use stevedore::domain::models::{PodGroupWithSpec, RunState};
use stevedore::domain::ports::store::StoreExt;

#[tokio::test]
async fn test_reschedule_spec_rejected_without_memory() {
    let (engine, cluster, store) = build_engine(vec![node("node-1", 1_000_000_000, 0)]).await;
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
    let created_before = cluster.created_count();

    // The original node is gone; only a 512 MB node remains, and the
    // group's pods occupy none of it.
    cluster.set_nodes(vec![node("node-2", 512_000_000, 0)]).await;

    let mut new_pod = group_spec("web", 2, 256_000_000).pod;
    new_pod.containers[0].memory_limit = 400_000_000;
    engine.reschedule_spec("web", new_pod).await.unwrap();

    let recorded = wait_for(
        || async {
            engine
                .inspect_pod_group("web")
                .await
                .map(|b| b.pod_group.last_error == "No resources available to scheduler container")
                .unwrap_or(false)
        },
        2_000,
    )
    .await;
    assert!(recorded, "admission rejection never surfaced on the group");

    // Nothing was enqueued: no new containers, no spec change.
    assert_eq!(cluster.created_count(), created_before);
    let bundle = engine.inspect_pod_group("web").await.unwrap();
    assert_eq!(bundle.spec.pod.version, 0);
    assert_eq!(bundle.spec.pod.containers[0].memory_limit, 256_000_000);

    // The rejection was persisted for a restarted engine to see.
    let stored: PodGroupWithSpec = store
        .get("/lain/deployd/podgroup/prod/web")
        .await
        .unwrap();
    assert_eq!(
        stored.pod_group.last_error,
        "No resources available to scheduler container"
    );
    engine.stop();
}

#[tokio::test]
async fn test_reschedule_spec_accepted_with_headroom() {
    let (engine, _cluster, _store) = build_engine(vec![node("node-1", 4_000_000_000, 0)]).await;
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

    let mut new_pod = group_spec("web", 2, 256_000_000).pod;
    new_pod.containers[0].memory_limit = 400_000_000;
    new_pod.containers[0].image = "web:next".to_string();
    engine.reschedule_spec("web", new_pod).await.unwrap();

    let upgraded = wait_for(
        || async {
            engine
                .inspect_pod_group("web")
                .await
                .map(|b| {
                    b.spec.pod.version == 1
                        && b.spec.pod.containers[0].image == "web:next"
                        && b.pod_group.state == RunState::Running
                })
                .unwrap_or(false)
        },
        2_000,
    )
    .await;
    assert!(upgraded, "accepted reschedule never rolled out");
    engine.stop();
}
