//! Pod and pod-spec model types.
//!
//! A pod is one container instance identified by `(pod-group-name,
//! instance-number)`. A `PodSpec` is the declarative description of that
//! workload; it is immutable after creation except through operations that
//! bump its `version`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Restart policy applied when a container of the pod dies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFail,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnFail => "onfail",
            Self::Never => "never",
        }
    }
}

/// Health reported by the runtime for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Starting => write!(f, "starting"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// A TCP/UDP port a container exposes to the stream router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPort {
    pub port: u16,
    #[serde(default = "default_proto")]
    pub proto: String,
}

fn default_proto() -> String {
    "tcp".to_string()
}

/// One container workload inside a pod.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    /// Memory limit in bytes. The admission heuristic reads the first
    /// container's limit only.
    #[serde(default)]
    pub memory_limit: i64,
    #[serde(default)]
    pub cpu_limit: i64,
    #[serde(default)]
    pub expose_ports: Vec<StreamPort>,
    /// Health-check command. When set, deploys wait for the runtime's
    /// healthy transition before considering the instance launched.
    #[serde(default)]
    pub health_check: Option<String>,
}

/// Reference to a shared dependency pod. References are weak: a spec may
/// name a dependency that is not (yet) registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub pod_name: String,
}

/// Declarative description of a single pod workload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodSpec {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub version: u32,
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PodSpec {
    /// Memory one instance of this pod needs, per the first container.
    /// The admission heuristic assumes homogeneous single-container pods.
    pub fn memory_per_instance(&self) -> i64 {
        self.containers.first().map_or(0, |c| c.memory_limit)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("pod spec name cannot be empty".to_string());
        }
        if self.containers.is_empty() {
            return Err(format!("pod spec {} has no containers", self.name));
        }
        if self.containers.iter().any(|c| c.image.is_empty()) {
            return Err(format!("pod spec {} has a container without image", self.name));
        }
        Ok(())
    }

    /// Produce the next version of this spec, stamped now.
    pub fn next_version(mut self) -> Self {
        self.version += 1;
        self.updated_at = Some(Utc::now());
        self
    }
}

/// Runtime record of one pod instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pod {
    pub instance_no: usize,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub health: HealthState,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Pod {
    pub fn new(instance_no: usize) -> Self {
        Self {
            instance_no,
            ..Self::default()
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }
}

/// Previous placement of one instance, persisted so a restarted engine can
/// reconcile against what it last knew.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodPrevState {
    pub instance_no: usize,
    pub node_name: String,
    pub container_id: String,
}
