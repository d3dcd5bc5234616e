//! The orc engine: operation queue, sub-controllers, refresh scheduler,
//! cluster monitor, and removal janitors.

pub mod constraint;
pub mod core;
pub mod depends;
pub mod eagle_view;
pub mod history;
pub mod keys;
pub mod monitor;
pub mod notify;
pub mod operations;
pub mod pod_group;
pub mod ports_registry;
pub mod publisher;
pub(crate) mod worker;

pub use constraint::ConstraintController;
pub use self::core::{EngineConfig, EngineOptions, EngineTimings, OrcEngine};
pub use depends::DependsController;
pub use eagle_view::{EagleView, RuntimeContainer};
pub use notify::NotifyController;
pub use pod_group::{ChangeStateOp, PodGroupController};
pub use publisher::{BusEvent, Listener, Publisher};
