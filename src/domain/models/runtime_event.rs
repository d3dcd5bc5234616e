//! Events and container views delivered by the container runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::pod::HealthState;

/// Coarse event category on the runtime stream. Only container events are
/// dispatched; everything else is logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Container,
    Image,
    Network,
    Daemon,
    #[default]
    Other,
}

/// One event off the runtime stream.
///
/// `status` carries the action (`start`, `stop`, `die`,
/// `health_status: healthy`, `engine_disconnect`, ...); `from` identifies
/// the emitting source, with a `swarm` prefix marking cluster-level events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub kind: EventKind,
    pub status: String,
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub from: String,
}

impl RuntimeEvent {
    pub fn container_name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

/// Compact row from a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub node_name: String,
    pub running: bool,
}

/// Result of inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub node_name: String,
    pub running: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub health: HealthState,
}
