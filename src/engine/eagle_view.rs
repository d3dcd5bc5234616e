//! Cached projection of live cluster container state.
//!
//! Sub-controllers reconcile against this view instead of hammering the
//! runtime with per-container lookups on every refresh.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::models::parse_container_name;
use crate::domain::ports::cluster::{Cluster, ClusterError};

/// One container the runtime reported, resolved to its pod-group slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: String,
    pub name: String,
    pub pg_name: String,
    pub namespace: String,
    pub instance_no: usize,
    pub node_name: String,
    pub running: bool,
}

#[derive(Default)]
pub struct EagleView {
    inner: RwLock<HashMap<String, Vec<RuntimeContainer>>>,
}

impl EagleView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-list the whole cluster and rebuild the cache. Containers whose
    /// names don't parse as pod-group instances are not ours; skip them.
    pub async fn refresh(&self, cluster: &dyn Cluster) -> Result<(), ClusterError> {
        let listed = cluster.list_containers().await?;
        let mut fresh: HashMap<String, Vec<RuntimeContainer>> = HashMap::new();
        for summary in listed {
            let Some((pg_name, namespace, instance_no, _)) = parse_container_name(&summary.name)
            else {
                continue;
            };
            fresh.entry(pg_name.clone()).or_default().push(RuntimeContainer {
                id: summary.id,
                name: summary.name,
                pg_name,
                namespace,
                instance_no,
                node_name: summary.node_name,
                running: summary.running,
            });
        }
        *self.inner.write().await = fresh;
        Ok(())
    }

    /// Refresh the cache and return the containers belonging to `name`.
    pub async fn refresh_pod_group(
        &self,
        cluster: &dyn Cluster,
        name: &str,
    ) -> Result<Vec<RuntimeContainer>, ClusterError> {
        self.refresh(cluster).await?;
        Ok(self.get(name).await)
    }

    pub async fn get(&self, name: &str) -> Vec<RuntimeContainer> {
        self.inner.read().await.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_cluster::MockCluster;
    use crate::domain::models::Node;
    use crate::domain::ports::cluster::{Cluster as _, ContainerCreateOptions};

    #[tokio::test]
    async fn test_refresh_groups_by_pod_group() {
        let cluster = MockCluster::new(vec![Node {
            name: "node-1".to_string(),
            memory: 1_000_000_000,
            ..Node::default()
        }]);
        for (name, instance) in [("web", 1), ("web", 2), ("api", 1)] {
            let id = cluster
                .create_container(&ContainerCreateOptions {
                    name: format!("{name}.prod.{instance}.aaaa"),
                    image: "img".to_string(),
                    ..ContainerCreateOptions::default()
                })
                .await
                .unwrap();
            cluster.start_container(&id).await.unwrap();
        }
        // A foreign container the view must ignore.
        cluster
            .create_container(&ContainerCreateOptions {
                name: "unrelated".to_string(),
                image: "img".to_string(),
                ..ContainerCreateOptions::default()
            })
            .await
            .unwrap();

        let view = EagleView::new();
        let web = view.refresh_pod_group(&cluster, "web").await.unwrap();
        assert_eq!(web.len(), 2);
        assert!(web.iter().all(|c| c.running && c.namespace == "prod"));
        assert_eq!(view.get("api").await.len(), 1);
        assert!(view.get("unrelated").await.is_empty());
    }
}
