//! Model types persisted to the store or exchanged with the cluster.

pub mod constraint;
pub mod container_name;
pub mod depends;
pub mod node;
pub mod notify;
pub mod pod;
pub mod pod_group;
pub mod runtime_event;

pub use constraint::ConstraintSpec;
pub use container_name::{
    parse_container_name, parse_name_instance, render_container_name, render_name_instance,
};
pub use depends::{DependencyEvent, NamespacePodsWithSpec, RemoveStatus, SharedPodWithSpec};
pub use node::Node;
pub use notify::NotifySpec;
pub use pod::{
    ContainerSpec, Dependency, HealthState, Pod, PodPrevState, PodSpec, RestartPolicy, StreamPort,
};
pub use pod_group::{PgOpState, PodGroup, PodGroupSpec, PodGroupWithSpec, RunState};
pub use runtime_event::{ContainerDetail, ContainerSummary, EventKind, RuntimeEvent};
