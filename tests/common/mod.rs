//! Shared fixtures for engine integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use stevedore::adapters::{MemoryStore, MockCluster};
use stevedore::domain::models::{ContainerSpec, Node, PodGroupSpec, PodSpec};
use stevedore::{EngineOptions, EngineTimings, OrcEngine};

/// Production timings shrunk so janitors, monitors, and refresh waves
/// complete inside a test run.
pub fn fast_timings() -> EngineTimings {
    EngineTimings {
        refresh_interval: Duration::from_millis(200),
        ports_interval: Duration::from_secs(300),
        janitor_poll: Duration::from_millis(20),
        janitor_timeout: Duration::from_millis(300),
        monitor_restart_delay: Duration::from_millis(1),
        down_node_reset: Duration::from_millis(300),
        launch_wait: Duration::from_millis(50),
        depends_gc_grace: Duration::from_millis(100),
        cluster_failed_threshold: 20,
        max_down_node: 3,
    }
}

pub async fn build_engine(nodes: Vec<Node>) -> (Arc<OrcEngine>, Arc<MockCluster>, Arc<MemoryStore>) {
    let cluster = Arc::new(MockCluster::new(nodes));
    let store = Arc::new(MemoryStore::new());
    let engine = OrcEngine::new(
        cluster.clone(),
        store.clone(),
        EngineOptions {
            config: Default::default(),
            timings: fast_timings(),
        },
    )
    .await
    .expect("engine construction");
    (engine, cluster, store)
}

pub fn node(name: &str, memory: i64, used_memory: i64) -> Node {
    Node {
        name: name.to_string(),
        memory,
        used_memory,
        cpus: 4,
        used_cpus: 0,
    }
}

pub fn group_spec(name: &str, instances: usize, memory: i64) -> PodGroupSpec {
    PodGroupSpec {
        name: name.to_string(),
        namespace: "prod".to_string(),
        num_instances: instances,
        pod: PodSpec {
            name: name.to_string(),
            namespace: "prod".to_string(),
            containers: vec![ContainerSpec {
                image: format!("{name}:latest"),
                memory_limit: memory,
                ..ContainerSpec::default()
            }],
            ..PodSpec::default()
        },
        ..PodGroupSpec::default()
    }
}

/// Poll an async predicate every 10ms until it holds or the timeout
/// passes.
pub async fn wait_for<F, Fut>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
