//! Docker Engine API cluster adapter.
//!
//! Talks to a Docker (or classic-swarm) endpoint over HTTP. Covers
//! exactly what the engine needs: node resources, container lifecycle,
//! inspect, and the `/events` stream.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::domain::models::{
    ContainerDetail, ContainerSummary, EventKind, HealthState, Node, RuntimeEvent,
};
use crate::domain::ports::cluster::{
    Cluster, ClusterError, ContainerCreateOptions, MonitorId,
};

pub struct DockerCluster {
    http: reqwest::Client,
    base_url: String,
    monitors: RwLock<HashMap<MonitorId, JoinHandle<()>>>,
}

fn transport(err: reqwest::Error) -> ClusterError {
    ClusterError::Transport(err.to_string())
}

impl DockerCluster {
    /// `endpoint` is the engine API address, e.g. `http://127.0.0.1:2375`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: endpoint.trim_end_matches('/').to_string(),
            monitors: RwLock::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: reqwest::Response, id: &str) -> Result<reqwest::Response, ClusterError> {
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ClusterError::ContainerNotFound(id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(ClusterError::Transport(format!(
                "docker api returned {}",
                resp.status()
            )));
        }
        Ok(resp)
    }

    fn parse_event(line: &str) -> Option<RuntimeEvent> {
        let value: Value = serde_json::from_str(line).ok()?;
        let kind = match value.get("Type").and_then(Value::as_str).unwrap_or("container") {
            "container" => EventKind::Container,
            "image" => EventKind::Image,
            "network" => EventKind::Network,
            "daemon" => EventKind::Daemon,
            _ => EventKind::Other,
        };
        // Modern engines put the action under "Action", legacy ones under
        // "status"; health transitions keep their long form either way.
        let status = value
            .get("Action")
            .or_else(|| value.get("status"))
            .and_then(Value::as_str)?
            .to_string();
        let id = value
            .pointer("/Actor/ID")
            .or_else(|| value.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut attributes = HashMap::new();
        if let Some(map) = value.pointer("/Actor/Attributes").and_then(Value::as_object) {
            for (k, v) in map {
                if let Some(v) = v.as_str() {
                    attributes.insert(k.clone(), v.to_string());
                }
            }
        }
        Some(RuntimeEvent {
            kind,
            status,
            id,
            attributes,
            node_name: value
                .pointer("/node/Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            from: value
                .get("from")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    fn parse_health(status: &str) -> HealthState {
        match status {
            "starting" => HealthState::Starting,
            "healthy" => HealthState::Healthy,
            "unhealthy" => HealthState::Unhealthy,
            _ => HealthState::None,
        }
    }
}

#[async_trait]
impl Cluster for DockerCluster {
    async fn get_resources(&self) -> Result<Vec<Node>, ClusterError> {
        let info: Value = self
            .http
            .get(self.url("/info"))
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        // A plain engine reports itself as the single node. Committed
        // memory is not exposed here, so the admission heuristic sees the
        // node's full capacity.
        Ok(vec![Node {
            name: info
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or("docker")
                .to_string(),
            memory: info.get("MemTotal").and_then(Value::as_i64).unwrap_or(0),
            used_memory: 0,
            cpus: info.get("NCPU").and_then(Value::as_i64).unwrap_or(0),
            used_cpus: 0,
        }])
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ClusterError> {
        let rows: Vec<Value> = self
            .http
            .get(self.url("/containers/json?all=true"))
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        Ok(rows
            .iter()
            .map(|row| {
                let name = row
                    .pointer("/Names/0")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string();
                ContainerSummary {
                    id: row
                        .get("Id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name,
                    node_name: String::new(),
                    running: row.get("State").and_then(Value::as_str) == Some("running"),
                }
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, ClusterError> {
        let resp = self
            .http
            .get(self.url(&format!("/containers/{id}/json")))
            .send()
            .await
            .map_err(transport)?;
        let detail: Value = Self::check(resp, id).await?.json().await.map_err(transport)?;
        Ok(ContainerDetail {
            id: detail
                .get("Id")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string(),
            name: detail
                .get("Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            node_name: detail
                .pointer("/Node/Name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            running: detail
                .pointer("/State/Running")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            exit_code: detail
                .pointer("/State/ExitCode")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            health: detail
                .pointer("/State/Health/Status")
                .and_then(Value::as_str)
                .map_or(HealthState::None, Self::parse_health),
        })
    }

    async fn create_container(&self, opts: &ContainerCreateOptions) -> Result<String, ClusterError> {
        let mut env = opts.env.clone();
        if !opts.node_name.is_empty() {
            // Classic-swarm placement constraint.
            env.push(format!("constraint:node=={}", opts.node_name));
        }
        let body = json!({
            "Image": opts.image,
            "Cmd": opts.command,
            "Env": env,
            "HostConfig": {
                "Memory": opts.memory_limit,
                "CpuShares": opts.cpu_limit,
            },
        });
        let resp = self
            .http
            .post(self.url(&format!("/containers/create?name={}", opts.name)))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let created: Value = Self::check(resp, &opts.name)
            .await?
            .json()
            .await
            .map_err(transport)?;
        created
            .get("Id")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| ClusterError::Transport("create response missing Id".to_string()))
    }

    async fn start_container(&self, id: &str) -> Result<(), ClusterError> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/start")))
            .send()
            .await
            .map_err(transport)?;
        Self::check(resp, id).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str) -> Result<(), ClusterError> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/stop?t=10")))
            .send()
            .await
            .map_err(transport)?;
        Self::check(resp, id).await.map(|_| ())
    }

    async fn restart_container(&self, id: &str) -> Result<(), ClusterError> {
        let resp = self
            .http
            .post(self.url(&format!("/containers/{id}/restart?t=10")))
            .send()
            .await
            .map_err(transport)?;
        Self::check(resp, id).await.map(|_| ())
    }

    async fn remove_container(&self, id: &str) -> Result<(), ClusterError> {
        let resp = self
            .http
            .delete(self.url(&format!("/containers/{id}?force=true&v=true")))
            .send()
            .await
            .map_err(transport)?;
        Self::check(resp, id).await.map(|_| ())
    }

    async fn monitor_events(
        &self,
        filter: &str,
    ) -> (MonitorId, mpsc::Receiver<Result<RuntimeEvent, ClusterError>>) {
        let (tx, rx) = mpsc::channel(256);
        let id = MonitorId::new();
        let mut url = self.url("/events");
        if !filter.is_empty() {
            url = format!("{url}?filters={filter}");
        }
        let http = self.http.clone();
        let handle = tokio::spawn(async move {
            let resp = match http.get(url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    let _ = tx.send(Err(transport(err))).await;
                    return;
                }
            };
            let mut stream = resp.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let Some(event) = Self::parse_event(line) {
                                if tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(transport(err))).await;
                        return;
                    }
                }
            }
            let _ = tx.send(Err(ClusterError::StreamClosed)).await;
        });
        self.monitors.write().await.insert(id, handle);
        (id, rx)
    }

    async fn stop_monitor(&self, id: MonitorId) {
        if let Some(handle) = self.monitors.write().await.remove(&id) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modern_event() {
        let line = r#"{"Type":"container","Action":"die","Actor":{"ID":"abc","Attributes":{"name":"web.prod.1.x","exitCode":"137"}}}"#;
        let event = DockerCluster::parse_event(line).unwrap();
        assert_eq!(event.kind, EventKind::Container);
        assert_eq!(event.status, "die");
        assert_eq!(event.id, "abc");
        assert_eq!(event.container_name(), Some("web.prod.1.x"));
    }

    #[test]
    fn test_parse_legacy_event() {
        let line = r#"{"status":"engine_disconnect","id":"","from":"swarm","node":{"Name":"node-3"}}"#;
        let event = DockerCluster::parse_event(line).unwrap();
        assert_eq!(event.status, "engine_disconnect");
        assert_eq!(event.from, "swarm");
        assert_eq!(event.node_name, "node-3");
    }

    #[test]
    fn test_parse_event_rejects_garbage() {
        assert!(DockerCluster::parse_event("not json").is_none());
        assert!(DockerCluster::parse_event("{}").is_none());
    }
}
