//! Notification payloads delivered to registered webhooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code identifying cluster health degradation, the only notification the
/// engine core emits itself.
pub const NOTIFY_CLUSTER_UNHEALTHY: &str = "cluster_unhealthy";

/// Payload POSTed to every registered callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySpec {
    pub source: String,
    pub subject: String,
    pub level: u8,
    pub timestamp: DateTime<Utc>,
    pub code: String,
}

impl NotifySpec {
    pub fn new(source: &str, subject: &str, level: u8, code: &str) -> Self {
        Self {
            source: source.to_string(),
            subject: subject.to_string(),
            level,
            timestamp: Utc::now(),
            code: code.to_string(),
        }
    }

    /// The cluster event stream has been failing past the degradation
    /// threshold.
    pub fn cluster_unhealthy() -> Self {
        Self::new("Cluster", "Cluster-Manager", 1, NOTIFY_CLUSTER_UNHEALTHY)
    }
}
