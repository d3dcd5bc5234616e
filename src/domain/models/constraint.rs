//! Global placement-policy knobs persisted to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One constraint, keyed by its type (e.g. an excluded-node list).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub constraint_type: String,
    pub value: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}
