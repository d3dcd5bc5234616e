//! Engine operations: tagged variants carrying the target controller and
//! parameters, consumed in arrival order by the single operation worker.

use std::sync::Arc;

use crate::domain::models::{DependencyEvent, PodSpec, RestartPolicy};

use super::depends::{DepOp, DependsController};
use super::pod_group::{ChangeStateOp, PgOp, PodGroupController};

pub enum EngineOp {
    Deploy(Arc<PodGroupController>),
    Refresh(Arc<PodGroupController>, bool),
    Remove(Arc<PodGroupController>),
    RescheduleInstance(Arc<PodGroupController>, usize, Option<RestartPolicy>),
    RescheduleSpec(Arc<PodGroupController>, PodSpec),
    ChangeState(Arc<PodGroupController>, ChangeStateOp, usize),
    ScheduleDrift {
        ctrl: Arc<PodGroupController>,
        from_node: String,
        to_node: String,
        instance: usize,
        force: bool,
    },
    DependsAddSpec(Arc<DependsController>),
    DependsUpdateSpec(Arc<DependsController>, PodSpec),
    DependsRemoveSpec(Arc<DependsController>, bool),
    DependsRefresh(Arc<DependsController>),
    DependsDispatch(Arc<DependsController>, DependencyEvent),
}

impl EngineOp {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Deploy(_) => "deploy",
            Self::Refresh(..) => "refresh",
            Self::Remove(_) => "remove",
            Self::RescheduleInstance(..) => "reschedule_instance",
            Self::RescheduleSpec(..) => "reschedule_spec",
            Self::ChangeState(..) => "change_state",
            Self::ScheduleDrift { .. } => "schedule_drift",
            Self::DependsAddSpec(_) => "depends_add_spec",
            Self::DependsUpdateSpec(..) => "depends_update_spec",
            Self::DependsRemoveSpec(..) => "depends_remove_spec",
            Self::DependsRefresh(_) => "depends_refresh",
            Self::DependsDispatch(..) => "depends_dispatch",
        }
    }

    /// Forward the operation to its target controller's mailbox. The
    /// controller serializes its own work; the worker never blocks on
    /// cluster or store I/O here beyond mailbox backpressure.
    pub(crate) async fn dispatch(self) {
        match self {
            Self::Deploy(ctrl) => ctrl.enqueue(PgOp::Deploy).await,
            Self::Refresh(ctrl, force) => ctrl.enqueue(PgOp::Refresh { force }).await,
            Self::Remove(ctrl) => ctrl.enqueue(PgOp::Remove).await,
            Self::RescheduleInstance(ctrl, num_instances, restart_policy) => {
                ctrl.enqueue(PgOp::RescheduleInstances { num_instances, restart_policy }).await;
            }
            Self::RescheduleSpec(ctrl, pod_spec) => {
                ctrl.enqueue(PgOp::RescheduleSpec { pod_spec }).await;
            }
            Self::ChangeState(ctrl, op, instance) => {
                ctrl.enqueue(PgOp::ChangeState { op, instance }).await;
            }
            Self::ScheduleDrift { ctrl, from_node, to_node, instance, force } => {
                ctrl.enqueue(PgOp::Drift { from_node, to_node, instance, force }).await;
            }
            Self::DependsAddSpec(ctrl) => ctrl.enqueue(DepOp::AddSpec).await,
            Self::DependsUpdateSpec(ctrl, spec) => ctrl.enqueue(DepOp::UpdateSpec { spec }).await,
            Self::DependsRemoveSpec(ctrl, force) => {
                ctrl.enqueue(DepOp::RemoveSpec { force }).await;
            }
            Self::DependsRefresh(ctrl) => ctrl.enqueue(DepOp::Refresh).await,
            Self::DependsDispatch(ctrl, event) => ctrl.enqueue(DepOp::Dispatch { event }).await,
        }
    }
}
