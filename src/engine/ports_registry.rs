//! Stream-port assignments, revalidated on the slow tick.
//!
//! Every port a pod group's containers expose is registered under
//! `/ports/<port>`; the five-minute tick re-asserts ownership so entries
//! lost to manual store surgery or crashed removals come back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::ports::store::{Store, StoreExt};

use super::keys;
use super::pod_group::PodGroupController;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAssignment {
    pub owner: String,
    pub proto: String,
}

pub async fn refresh_ports(store: &dyn Store, ctrls: &[Arc<PodGroupController>]) {
    for ctrl in ctrls {
        let bundle = ctrl.inspect().await;
        let owner = bundle.spec.name.clone();
        for container in &bundle.spec.pod.containers {
            for stream_port in &container.expose_ports {
                let key = keys::port(stream_port.port);
                let desired = PortAssignment {
                    owner: owner.clone(),
                    proto: stream_port.proto.clone(),
                };
                match store.get::<PortAssignment>(&key).await {
                    Ok(existing) if existing.owner != owner => {
                        warn!(
                            port = stream_port.port,
                            owner = %existing.owner,
                            claimant = %owner,
                            "port already assigned, leaving existing owner"
                        );
                    }
                    _ => {
                        if let Err(err) = store.set(&key, &desired, false).await {
                            warn!(port = stream_port.port, %err, "port registration failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;
    use crate::domain::models::{
        ContainerSpec, PodGroup, PodGroupSpec, PodSpec, StreamPort,
    };

    fn ctrl_with_port(name: &str, port: u16) -> Arc<PodGroupController> {
        PodGroupController::new(
            PodGroupSpec {
                name: name.to_string(),
                namespace: "prod".to_string(),
                num_instances: 1,
                pod: PodSpec {
                    name: name.to_string(),
                    namespace: "prod".to_string(),
                    containers: vec![ContainerSpec {
                        image: "img".to_string(),
                        expose_ports: vec![StreamPort {
                            port,
                            proto: "tcp".to_string(),
                        }],
                        ..ContainerSpec::default()
                    }],
                    ..PodSpec::default()
                },
                ..PodGroupSpec::default()
            },
            Vec::new(),
            PodGroup::default(),
        )
    }

    #[tokio::test]
    async fn test_ports_registered_and_conflicts_kept() {
        let store = MemoryStore::new();
        let web = ctrl_with_port("web", 8080);
        refresh_ports(&store, &[web.clone()]).await;
        let assigned: PortAssignment = store.get(&keys::port(8080)).await.unwrap();
        assert_eq!(assigned.owner, "web");

        // A second group claiming the same port does not steal it.
        let api = ctrl_with_port("api", 8080);
        refresh_ports(&store, &[api]).await;
        let assigned: PortAssignment = store.get(&keys::port(8080)).await.unwrap();
        assert_eq!(assigned.owner, "web");
    }
}
