//! Cluster node resources.

use serde::{Deserialize, Serialize};

/// Resource snapshot for one worker node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Total memory in bytes.
    pub memory: i64,
    /// Memory already committed, in bytes.
    pub used_memory: i64,
    pub cpus: i64,
    #[serde(default)]
    pub used_cpus: i64,
}

impl Node {
    pub fn free_memory(&self) -> i64 {
        self.memory - self.used_memory
    }
}
