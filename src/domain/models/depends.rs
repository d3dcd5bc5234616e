//! Shared dependency-pod model types.
//!
//! A dependency pod is shared across pod groups: one instance per
//! `(namespace, node)`, reference-held by the pod groups consuming it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pod::{Pod, PodSpec};

/// One shared dependency instance with its refcount and the spec version
/// it was created from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SharedPodWithSpec {
    pub refcount: usize,
    /// Stamped at creation and again when the refcount drops to zero;
    /// an unreferenced instance older than the grace window is collected.
    #[serde(default)]
    pub last_verified: Option<DateTime<Utc>>,
    pub pod: Pod,
    pub spec: PodSpec,
}

/// namespace -> node name -> shared instance.
pub type NamespacePodsWithSpec = HashMap<String, HashMap<String, SharedPodWithSpec>>;

/// Emitted by pod-group controllers when an instance that consumes a
/// dependency appears on or leaves a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyEvent {
    Add {
        name: String,
        namespace: String,
        node_name: String,
    },
    Remove {
        name: String,
        namespace: String,
        node_name: String,
    },
}

impl DependencyEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Add { name, .. } | Self::Remove { name, .. } => name,
        }
    }
}

/// Answer a dependency controller gives the removal janitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RemoveStatus {
    /// Removal still in flight, keep polling.
    #[default]
    Pending = 0,
    /// Every instance confirmed gone.
    Removed = 1,
    /// Still referenced, abort the removal.
    InUse = 2,
}

impl RemoveStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Removed,
            2 => Self::InUse,
            _ => Self::Pending,
        }
    }
}
