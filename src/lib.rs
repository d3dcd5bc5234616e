//! Stevedore - container-orchestration control plane
//!
//! An orc engine that drives a cluster of worker nodes toward declarative
//! pod-group specifications:
//! - Single-writer operation queue with per-controller mailboxes
//! - Pod-group and dependency-pod sub-controllers
//! - Refresh scheduler spacing reconciliation across the interval
//! - Cluster monitor with restart backoff and node-loss safety brake
//! - Crash recovery from a hierarchical key-value store

pub mod adapters;
pub mod domain;
pub mod engine;
pub mod infrastructure;

// Re-export key types for convenience
pub use domain::errors::{OrcError, OrcResult};
pub use engine::core::{EngineConfig, EngineOptions, EngineTimings, OrcEngine};
