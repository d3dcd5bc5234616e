//! Pod-group model types: the sized set of homogeneous pods managed as a
//! unit, its declarative spec, and the per-group operation lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pod::{Pod, PodPrevState, PodSpec, RestartPolicy};

/// Aggregate run state of a pod group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Pending,
    Running,
    Failure,
    Success,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Failure => write!(f, "failure"),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Per-pod-group exclusive operation lock. Only `Idle` accepts new
/// operations; every other state rejects them with `OperLocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PgOpState {
    #[default]
    Idle = 0,
    Deploying = 1,
    Upgrading = 2,
    Scheduling = 3,
    Stopping = 4,
    Starting = 5,
    Restarting = 6,
    Removing = 7,
    Drifting = 8,
}

impl PgOpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Deploying => "deploying",
            Self::Upgrading => "upgrading",
            Self::Scheduling => "scheduling",
            Self::Stopping => "stopping",
            Self::Starting => "starting",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Drifting => "drifting",
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Deploying,
            2 => Self::Upgrading,
            3 => Self::Scheduling,
            4 => Self::Stopping,
            5 => Self::Starting,
            6 => Self::Restarting,
            7 => Self::Removing,
            8 => Self::Drifting,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for PgOpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declarative spec of a pod group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodGroupSpec {
    pub name: String,
    pub namespace: String,
    pub num_instances: usize,
    pub pod: PodSpec,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// Constraint hints: when non-empty, instances are only placed on the
    /// named nodes.
    #[serde(default)]
    pub node_hints: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl PodGroupSpec {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("pod group name cannot be empty".to_string());
        }
        if self.num_instances == 0 {
            return Err(format!("pod group {} needs at least one instance", self.name));
        }
        self.pod.validate()
    }
}

/// Observed runtime state of a pod group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodGroup {
    #[serde(default)]
    pub state: RunState,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub last_error: String,
    /// Set while the group is administratively stopped; refresh observes
    /// but does not resurrect containers until it clears.
    #[serde(default)]
    pub stopped: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PodGroup {
    /// Derive the aggregate state from the per-pod records.
    ///
    /// Any pod with a recorded error wins as `Failure`; a group whose pods
    /// all exited under a `Never` restart policy is `Success`; all pods
    /// placed and running is `Running`; anything else is still `Pending`.
    /// `updated_at` moves only on an actual transition: refresh ticks
    /// re-evaluate constantly and an unchanged group must serialize
    /// identically so the store's hash check can suppress the write.
    pub fn evaluate_state(&mut self, restart_policy: RestartPolicy, num_instances: usize) {
        let next = if self.pods.iter().any(|p| !p.last_error.is_empty()) {
            RunState::Failure
        } else if self.pods.len() < num_instances {
            RunState::Pending
        } else if self.pods.iter().all(|p| p.running && !p.container_id.is_empty()) {
            RunState::Running
        } else if restart_policy == RestartPolicy::Never && self.pods.iter().all(|p| !p.running) {
            RunState::Success
        } else {
            RunState::Pending
        };
        if next != self.state {
            self.state = next;
            self.updated_at = Some(Utc::now());
        }
    }

    /// Snapshot of per-instance placement, persisted beside the group.
    pub fn prev_states(&self) -> Vec<PodPrevState> {
        self.pods
            .iter()
            .map(|p| PodPrevState {
                instance_no: p.instance_no,
                node_name: p.node_name.clone(),
                container_id: p.container_id.clone(),
            })
            .collect()
    }
}

/// Store bundle: one key per pod group carries the spec, the previous
/// per-instance state vector, and the observed group.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodGroupWithSpec {
    pub spec: PodGroupSpec,
    #[serde(default)]
    pub prev_state: Vec<PodPrevState>,
    pub pod_group: PodGroup,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(instance: usize, running: bool, err: &str) -> Pod {
        Pod {
            instance_no: instance,
            node_name: "node-1".to_string(),
            container_id: format!("c{instance}"),
            running,
            last_error: err.to_string(),
            ..Pod::default()
        }
    }

    #[test]
    fn test_all_running_is_running() {
        let mut group = PodGroup {
            pods: vec![pod(1, true, ""), pod(2, true, "")],
            ..PodGroup::default()
        };
        group.evaluate_state(RestartPolicy::Always, 2);
        assert_eq!(group.state, RunState::Running);
    }

    #[test]
    fn test_pod_error_is_failure() {
        let mut group = PodGroup {
            pods: vec![pod(1, true, ""), pod(2, false, "no such image")],
            ..PodGroup::default()
        };
        group.evaluate_state(RestartPolicy::Always, 2);
        assert_eq!(group.state, RunState::Failure);
    }

    #[test]
    fn test_missing_instances_is_pending() {
        let mut group = PodGroup {
            pods: vec![pod(1, true, "")],
            ..PodGroup::default()
        };
        group.evaluate_state(RestartPolicy::Always, 2);
        assert_eq!(group.state, RunState::Pending);
    }

    #[test]
    fn test_run_once_exit_is_success() {
        let mut group = PodGroup {
            pods: vec![pod(1, false, ""), pod(2, false, "")],
            ..PodGroup::default()
        };
        group.evaluate_state(RestartPolicy::Never, 2);
        assert_eq!(group.state, RunState::Success);
    }

    #[test]
    fn test_bundle_round_trips_through_json() {
        let bundle = PodGroupWithSpec {
            spec: PodGroupSpec {
                name: "web".to_string(),
                namespace: "prod".to_string(),
                num_instances: 2,
                ..PodGroupSpec::default()
            },
            prev_state: vec![PodPrevState {
                instance_no: 1,
                node_name: "node-1".to_string(),
                container_id: "c1".to_string(),
            }],
            pod_group: PodGroup {
                pods: vec![pod(1, true, "")],
                ..PodGroup::default()
            },
        };
        let raw = serde_json::to_string(&bundle).unwrap();
        let back: PodGroupWithSpec = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, bundle);
    }
}
