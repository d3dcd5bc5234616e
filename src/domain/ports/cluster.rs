//! Container-runtime cluster port.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::models::{ContainerDetail, ContainerSummary, Node, RuntimeEvent};

/// Transport and lookup failures from the runtime client. Transport
/// errors feed the engine's cluster-health failure counter.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("cluster transport error: {0}")]
    Transport(String),

    #[error("event stream closed")]
    StreamClosed,
}

/// Handle for an open event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(pub Uuid);

impl MonitorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerCreateOptions {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub memory_limit: i64,
    pub cpu_limit: i64,
    /// Placement hint; empty lets the runtime choose.
    pub node_name: String,
}

/// The container-runtime client.
///
/// Individual calls rely on the underlying client's own timeouts; the
/// engine never wraps them.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ClusterError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, ClusterError>;

    /// Create a container and return its id. The container is not started.
    async fn create_container(&self, opts: &ContainerCreateOptions) -> Result<String, ClusterError>;

    async fn start_container(&self, id: &str) -> Result<(), ClusterError>;

    async fn stop_container(&self, id: &str) -> Result<(), ClusterError>;

    async fn restart_container(&self, id: &str) -> Result<(), ClusterError>;

    async fn remove_container(&self, id: &str) -> Result<(), ClusterError>;

    /// Open an event subscription. Stream errors arrive in-band as `Err`
    /// items; the receiver closing means the subscription died.
    async fn monitor_events(
        &self,
        filter: &str,
    ) -> (MonitorId, mpsc::Receiver<Result<RuntimeEvent, ClusterError>>);

    async fn stop_monitor(&self, id: MonitorId);
}
