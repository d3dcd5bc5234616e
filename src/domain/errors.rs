//! Domain errors for the orc engine.

use thiserror::Error;

use crate::domain::ports::cluster::ClusterError;
use crate::domain::ports::store::StoreError;

/// Engine-level errors surfaced to API callers.
#[derive(Debug, Error)]
pub enum OrcError {
    #[error("PodGroup has already existed")]
    PodGroupExists,

    #[error("PodGroup not existed")]
    PodGroupNotExists,

    #[error("PodGroup is removing, need to wait for that")]
    PodGroupCleaning,

    #[error("Not enough CPUs and Memory to use")]
    NotEnoughResources,

    #[error("DependencyPod has already existed")]
    DependencyPodExists,

    #[error("DependencyPod not existed")]
    DependencyPodNotExists,

    #[error("Constraint not existed")]
    ConstraintNotExists,

    #[error("Notify uri not existed")]
    NotifyNotExists,

    #[error("Operation locked by {state}")]
    OperLocked { state: String },

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type OrcResult<T> = Result<T, OrcError>;
