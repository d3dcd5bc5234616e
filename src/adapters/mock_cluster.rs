//! Scriptable in-process cluster used by tests and local dry runs.
//!
//! Containers live in a map, nodes are whatever the test scripts, and
//! events are injected straight into open monitor subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::domain::models::{
    ContainerDetail, ContainerSummary, HealthState, Node, RuntimeEvent,
};
use crate::domain::ports::cluster::{
    Cluster, ClusterError, ContainerCreateOptions, MonitorId,
};

/// One fake container.
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub node_name: String,
    pub running: bool,
    pub exit_code: i32,
    pub health: HealthState,
}

#[derive(Default)]
struct MockState {
    nodes: Vec<Node>,
    containers: HashMap<String, MockContainer>,
    monitors: HashMap<MonitorId, mpsc::Sender<Result<RuntimeEvent, ClusterError>>>,
}

#[derive(Default)]
pub struct MockCluster {
    state: RwLock<MockState>,
    seq: AtomicU64,
    created: AtomicU64,
    fail_creates: AtomicBool,
    fail_removes: AtomicBool,
}

impl MockCluster {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            state: RwLock::new(MockState {
                nodes,
                ..MockState::default()
            }),
            ..Self::default()
        }
    }

    pub async fn set_nodes(&self, nodes: Vec<Node>) {
        self.state.write().await.nodes = nodes;
    }

    /// Total create calls that succeeded since construction.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub async fn containers(&self) -> Vec<MockContainer> {
        self.state.read().await.containers.values().cloned().collect()
    }

    pub async fn container_by_name(&self, name: &str) -> Option<MockContainer> {
        self.state
            .read()
            .await
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Mark a container dead without emitting any event.
    pub async fn kill_container(&self, id: &str, exit_code: i32) {
        if let Some(c) = self.state.write().await.containers.get_mut(id) {
            c.running = false;
            c.exit_code = exit_code;
        }
    }

    pub async fn set_health(&self, id: &str, health: HealthState) {
        if let Some(c) = self.state.write().await.containers.get_mut(id) {
            c.health = health;
        }
    }

    pub async fn monitor_count(&self) -> usize {
        self.state.read().await.monitors.len()
    }

    /// Deliver an event to every open subscription.
    pub async fn inject_event(&self, event: RuntimeEvent) {
        let senders: Vec<_> = self.state.read().await.monitors.values().cloned().collect();
        for tx in senders {
            let _ = tx.send(Ok(event.clone())).await;
        }
    }

    /// Deliver a transport error to every open subscription. An errored
    /// stream is dead, so the subscriptions are dropped here the way a
    /// real client's would be.
    pub async fn inject_stream_error(&self) {
        let senders: Vec<_> = self.state.write().await.monitors.drain().map(|(_, tx)| tx).collect();
        for tx in senders {
            let _ = tx.send(Err(ClusterError::Transport("injected".to_string()))).await;
        }
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(self.state.read().await.nodes.clone())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ClusterError> {
        Ok(self
            .state
            .read()
            .await
            .containers
            .values()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                node_name: c.node_name.clone(),
                running: c.running,
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, ClusterError> {
        let state = self.state.read().await;
        let c = state
            .containers
            .get(id)
            .ok_or_else(|| ClusterError::ContainerNotFound(id.to_string()))?;
        Ok(ContainerDetail {
            id: c.id.clone(),
            name: c.name.clone(),
            node_name: c.node_name.clone(),
            running: c.running,
            exit_code: c.exit_code,
            health: c.health,
        })
    }

    async fn create_container(&self, opts: &ContainerCreateOptions) -> Result<String, ClusterError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport("create refused".to_string()));
        }
        let mut state = self.state.write().await;
        let node_name = if opts.node_name.is_empty() {
            state
                .nodes
                .first()
                .map(|n| n.name.clone())
                .unwrap_or_default()
        } else {
            opts.node_name.clone()
        };
        let id = format!("mock-{}", self.seq.fetch_add(1, Ordering::SeqCst));
        state.containers.insert(
            id.clone(),
            MockContainer {
                id: id.clone(),
                name: opts.name.clone(),
                node_name,
                running: false,
                exit_code: 0,
                health: HealthState::None,
            },
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ClusterError> {
        let mut state = self.state.write().await;
        match state.containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(ClusterError::ContainerNotFound(id.to_string())),
        }
    }

    async fn stop_container(&self, id: &str) -> Result<(), ClusterError> {
        let mut state = self.state.write().await;
        match state.containers.get_mut(id) {
            Some(c) => {
                c.running = false;
                c.exit_code = 0;
                Ok(())
            }
            None => Err(ClusterError::ContainerNotFound(id.to_string())),
        }
    }

    async fn restart_container(&self, id: &str) -> Result<(), ClusterError> {
        let mut state = self.state.write().await;
        match state.containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                c.exit_code = 0;
                Ok(())
            }
            None => Err(ClusterError::ContainerNotFound(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), ClusterError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport("remove refused".to_string()));
        }
        let mut state = self.state.write().await;
        match state.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(ClusterError::ContainerNotFound(id.to_string())),
        }
    }

    async fn monitor_events(
        &self,
        _filter: &str,
    ) -> (MonitorId, mpsc::Receiver<Result<RuntimeEvent, ClusterError>>) {
        let (tx, rx) = mpsc::channel(64);
        let id = MonitorId::new();
        self.state.write().await.monitors.insert(id, tx);
        (id, rx)
    }

    async fn stop_monitor(&self, id: MonitorId) {
        self.state.write().await.monitors.remove(&id);
    }
}
