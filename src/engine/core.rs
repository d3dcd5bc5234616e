//! The orc engine.
//!
//! Holds the controller registries, validates API calls, and feeds the
//! single-consumer operation queue. Registry mutation happens under the
//! engine's write lock; cluster and store I/O never does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{OrcError, OrcResult};
use crate::domain::models::{
    ConstraintSpec, NamespacePodsWithSpec, Node, NotifySpec, PgOpState, PodGroup, PodGroupSpec,
    PodGroupWithSpec, PodSpec, RemoveStatus, RestartPolicy,
};
use crate::domain::ports::cluster::Cluster;
use crate::domain::ports::store::{Store, StoreExt};

use super::constraint::ConstraintController;
use super::depends::DependsController;
use super::eagle_view::EagleView;
use super::history::{self, StatusMessage};
use super::keys;
use super::monitor;
use super::notify::NotifyController;
use super::operations::EngineOp;
use super::pod_group::{ChangeStateOp, ControllerContext, PgOp, PodGroupController};
use super::publisher::{BusEvent, Listener};
use super::worker;

const OPS_QUEUE_DEPTH: usize = 500;

/// Maintenance knobs. Upper layers are expected to refuse mutating calls
/// while `read_only()` holds; the core itself keeps writing (loaders and
/// refreshes still persist).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub maintenance: bool,
}

/// Every interval and threshold the engine runs on. Defaults are the
/// production values; tests shrink them.
#[derive(Debug, Clone)]
pub struct EngineTimings {
    pub refresh_interval: Duration,
    pub ports_interval: Duration,
    pub janitor_poll: Duration,
    pub janitor_timeout: Duration,
    pub monitor_restart_delay: Duration,
    pub down_node_reset: Duration,
    pub launch_wait: Duration,
    pub depends_gc_grace: Duration,
    pub cluster_failed_threshold: u32,
    pub max_down_node: u32,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            ports_interval: Duration::from_secs(300),
            janitor_poll: Duration::from_secs(5),
            janitor_timeout: Duration::from_secs(60),
            monitor_restart_delay: Duration::from_millis(200),
            down_node_reset: Duration::from_secs(180),
            launch_wait: Duration::from_secs(30),
            depends_gc_grace: Duration::from_secs(300),
            cluster_failed_threshold: 20,
            max_down_node: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub config: EngineConfig,
    pub timings: EngineTimings,
}

/// Active/standby coordination flag a peer engine watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GuardState {
    working: bool,
    since: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) pg_ctrls: HashMap<String, Arc<PodGroupController>>,
    pub(crate) rm_pg_ctrls: HashMap<String, Arc<PodGroupController>>,
    pub(crate) depends_ctrls: HashMap<String, Arc<DependsController>>,
    pub(crate) rm_dep_ctrls: HashMap<String, Arc<DependsController>>,
}

pub struct OrcEngine {
    pub(crate) config: RwLock<EngineConfig>,
    pub(crate) timings: EngineTimings,
    pub(crate) cluster: Arc<dyn Cluster>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) eagle_view: Arc<EagleView>,
    pub(crate) registries: RwLock<Registries>,
    pub(crate) ops_tx: mpsc::Sender<EngineOp>,
    /// The worker task holds this lock while draining; keeping the
    /// receiver on the engine lets stop/start cycles reuse the queue.
    pub(crate) ops_rx: Arc<Mutex<mpsc::Receiver<EngineOp>>>,
    stop: std::sync::Mutex<Option<watch::Sender<bool>>>,
    cluster_fail_count: AtomicU32,
    constraints: Arc<ConstraintController>,
    notifier: Arc<NotifyController>,
}

impl OrcEngine {
    /// Build the engine: load constraints, notifies, dependency pods, and
    /// pod groups from the store, then start the workers. Controllers are
    /// activated during construction but nothing runs until the first
    /// operation or refresh tick.
    pub async fn new(
        cluster: Arc<dyn Cluster>,
        store: Arc<dyn Store>,
        options: EngineOptions,
    ) -> OrcResult<Arc<Self>> {
        let (ops_tx, ops_rx) = mpsc::channel(OPS_QUEUE_DEPTH);
        let engine = Arc::new(Self {
            config: RwLock::new(options.config),
            timings: options.timings,
            cluster,
            store,
            eagle_view: Arc::new(EagleView::new()),
            registries: RwLock::new(Registries::default()),
            ops_tx,
            ops_rx: Arc::new(Mutex::new(ops_rx)),
            stop: std::sync::Mutex::new(None),
            cluster_fail_count: AtomicU32::new(0),
            constraints: Arc::new(ConstraintController::new()),
            notifier: Arc::new(NotifyController::new()),
        });
        engine.constraints.load(engine.store.as_ref()).await?;
        engine.notifier.load(engine.store.as_ref()).await?;
        engine.load_depends_pods().await?;
        engine.load_pod_groups().await?;
        engine.watch_engine_config();
        engine.start();
        Ok(engine)
    }

    fn ctrl_context(&self) -> ControllerContext {
        ControllerContext {
            cluster: self.cluster.clone(),
            store: self.store.clone(),
            eagle_view: self.eagle_view.clone(),
            launch_wait: self.timings.launch_wait,
            depends_gc_grace: self.timings.depends_gc_grace,
        }
    }

    fn init_pod_group_ctrl(
        self: &Arc<Self>,
        spec: PodGroupSpec,
        prev_state: Vec<crate::domain::models::PodPrevState>,
        group: PodGroup,
    ) -> Arc<PodGroupController> {
        let ctrl = PodGroupController::new(spec, prev_state, group);
        ctrl.add_listener(Arc::new(EngineListener {
            engine: Arc::downgrade(self),
        }));
        ctrl.activate(self.ctrl_context());
        ctrl
    }

    fn init_depends_ctrl(
        self: &Arc<Self>,
        spec: PodSpec,
        pods: Option<NamespacePodsWithSpec>,
    ) -> Arc<DependsController> {
        let ctrl = DependsController::new(spec, pods);
        ctrl.activate(self.ctrl_context());
        ctrl
    }

    async fn enqueue(&self, op: EngineOp) {
        debug!(op = op.describe(), "enqueueing engine operation");
        if self.ops_tx.send(op).await.is_err() {
            error!("engine operation queue closed");
        }
    }

    pub(crate) async fn pg_ctrl(&self, name: &str) -> Option<Arc<PodGroupController>> {
        self.registries.read().await.pg_ctrls.get(name).cloned()
    }

    // ------------------------------------------------------------------
    // pod group API
    // ------------------------------------------------------------------

    pub async fn new_pod_group(self: &Arc<Self>, mut spec: PodGroupSpec) -> OrcResult<()> {
        spec.validate().map_err(OrcError::InvalidSpec)?;
        let ctrl = {
            let mut regs = self.registries.write().await;
            if regs.pg_ctrls.contains_key(&spec.name) {
                return Err(OrcError::PodGroupExists);
            }
            if regs.rm_pg_ctrls.contains_key(&spec.name) {
                return Err(OrcError::PodGroupCleaning);
            }
            for dep in &spec.pod.dependencies {
                if !regs.depends_ctrls.contains_key(&dep.pod_name) {
                    // Weak references are allowed; flag them but deploy.
                    warn!(pod_group = %spec.name, dependency = %dep.pod_name, "missing dependency pod");
                }
            }
            let now = Utc::now();
            spec.created_at = Some(now);
            spec.pod.created_at = Some(now);
            let ctrl = self.init_pod_group_ctrl(spec.clone(), Vec::new(), PodGroup::default());
            regs.pg_ctrls.insert(spec.name.clone(), ctrl.clone());
            ctrl
        };
        self.enqueue(EngineOp::Deploy(ctrl)).await;
        Ok(())
    }

    pub async fn inspect_pod_group(&self, name: &str) -> OrcResult<PodGroupWithSpec> {
        let ctrl = {
            let regs = self.registries.read().await;
            regs.pg_ctrls
                .get(name)
                .or_else(|| regs.rm_pg_ctrls.get(name))
                .cloned()
        };
        match ctrl {
            Some(ctrl) => Ok(ctrl.inspect().await),
            None => Err(OrcError::PodGroupNotExists),
        }
    }

    pub async fn refresh_pod_group(&self, name: &str, force_update: bool) -> OrcResult<()> {
        let ctrl = self.pg_ctrl(name).await.ok_or(OrcError::PodGroupNotExists)?;
        self.enqueue(EngineOp::Refresh(ctrl, force_update)).await;
        Ok(())
    }

    pub async fn remove_pod_group(self: &Arc<Self>, name: &str) -> OrcResult<()> {
        let ctrl = {
            let mut regs = self.registries.write().await;
            let ctrl = regs
                .pg_ctrls
                .get(name)
                .cloned()
                .ok_or(OrcError::PodGroupNotExists)?;
            let state = ctrl.can_operate(PgOpState::Removing);
            if state != PgOpState::Idle {
                return Err(OrcError::OperLocked {
                    state: state.to_string(),
                });
            }
            regs.pg_ctrls.remove(name);
            regs.rm_pg_ctrls.insert(name.to_string(), ctrl.clone());
            ctrl
        };
        info!(%name, "start removing pod group");
        self.enqueue(EngineOp::Remove(ctrl.clone())).await;
        let engine = self.clone();
        let name = name.to_string();
        tokio::spawn(async move { engine.check_pod_group_remove_result(name, ctrl).await });
        Ok(())
    }

    pub async fn reschedule_instances(
        &self,
        name: &str,
        num_instances: usize,
        restart_policy: Option<RestartPolicy>,
    ) -> OrcResult<()> {
        if num_instances == 0 {
            return Err(OrcError::InvalidSpec(
                "pod group needs at least one instance".to_string(),
            ));
        }
        let ctrl = self.pg_ctrl(name).await.ok_or(OrcError::PodGroupNotExists)?;
        let state = ctrl.can_operate(PgOpState::Scheduling);
        if state != PgOpState::Idle {
            return Err(OrcError::OperLocked {
                state: state.to_string(),
            });
        }
        self.enqueue(EngineOp::RescheduleInstance(ctrl, num_instances, restart_policy))
            .await;
        Ok(())
    }

    /// Replace the group's pod spec, admission-checked against cluster
    /// memory first. Rejection enqueues nothing: the error is recorded on
    /// the group and persisted for `inspect` to surface.
    pub async fn reschedule_spec(&self, name: &str, pod_spec: PodSpec) -> OrcResult<()> {
        let ctrl = self.pg_ctrl(name).await.ok_or(OrcError::PodGroupNotExists)?;
        {
            let regs = self.registries.read().await;
            for dep in &pod_spec.dependencies {
                if !regs.depends_ctrls.contains_key(&dep.pod_name) {
                    warn!(pod_group = %name, dependency = %dep.pod_name, "missing dependency pod");
                }
            }
        }
        let state = ctrl.can_operate(PgOpState::Scheduling);
        if state != PgOpState::Idle {
            return Err(OrcError::OperLocked {
                state: state.to_string(),
            });
        }
        if !self.has_enough_resource(&ctrl, &pod_spec).await {
            ctrl.release_operation();
            info!("No resources available to scheduler container");
            ctrl.set_last_error("No resources available to scheduler container").await;
            ctrl.enqueue(PgOp::SaveStore { force: true }).await;
            return Ok(());
        }
        self.enqueue(EngineOp::RescheduleSpec(ctrl, pod_spec)).await;
        Ok(())
    }

    /// `instance == 0` addresses the whole group.
    pub async fn change_state(&self, name: &str, op: &str, instance: usize) -> OrcResult<()> {
        let op = ChangeStateOp::parse(op)
            .ok_or_else(|| OrcError::InvalidSpec(format!("unknown state change {op:?}")))?;
        let ctrl = self.pg_ctrl(name).await.ok_or(OrcError::PodGroupNotExists)?;
        let state = ctrl.can_operate(op.target_op_state());
        if state != PgOpState::Idle {
            return Err(OrcError::OperLocked {
                state: state.to_string(),
            });
        }
        self.enqueue(EngineOp::ChangeState(ctrl, op, instance)).await;
        Ok(())
    }

    /// Relocate instances away from `from_node`. An empty `pg_name` fans
    /// the drift out to every active pod group.
    pub async fn drift_node(
        &self,
        from_node: &str,
        to_node: &str,
        pg_name: &str,
        pg_instance: usize,
        force: bool,
    ) {
        let ctrls: Vec<Arc<PodGroupController>> = {
            let regs = self.registries.read().await;
            if pg_name.is_empty() {
                regs.pg_ctrls.values().cloned().collect()
            } else {
                regs.pg_ctrls.get(pg_name).cloned().into_iter().collect()
            }
        };
        for ctrl in ctrls {
            self.enqueue(EngineOp::ScheduleDrift {
                ctrl,
                from_node: from_node.to_string(),
                to_node: to_node.to_string(),
                instance: pg_instance,
                force,
            })
            .await;
        }
    }

    pub async fn fetch_pod_history(&self, name: &str, instance: usize) -> Vec<StatusMessage> {
        history::fetch_pod_history(self.store.as_ref(), name, instance).await
    }

    // ------------------------------------------------------------------
    // dependency pod API
    // ------------------------------------------------------------------

    pub async fn new_dependency_pod(self: &Arc<Self>, mut spec: PodSpec) -> OrcResult<()> {
        spec.validate().map_err(OrcError::InvalidSpec)?;
        let ctrl = {
            let mut regs = self.registries.write().await;
            if regs.depends_ctrls.contains_key(&spec.name)
                || regs.rm_dep_ctrls.contains_key(&spec.name)
            {
                return Err(OrcError::DependencyPodExists);
            }
            spec.created_at = Some(Utc::now());
            let ctrl = self.init_depends_ctrl(spec.clone(), None);
            regs.depends_ctrls.insert(spec.name.clone(), ctrl.clone());
            ctrl
        };
        self.enqueue(EngineOp::DependsAddSpec(ctrl)).await;
        Ok(())
    }

    pub async fn get_dependency_pod(&self, name: &str) -> OrcResult<NamespacePodsWithSpec> {
        let ctrl = {
            let regs = self.registries.read().await;
            regs.depends_ctrls.get(name).cloned()
        };
        match ctrl {
            Some(ctrl) => Ok(ctrl.inspect().await),
            None => Err(OrcError::DependencyPodNotExists),
        }
    }

    pub async fn update_dependency_pod(&self, spec: PodSpec) -> OrcResult<()> {
        let ctrl = {
            let regs = self.registries.read().await;
            regs.depends_ctrls.get(&spec.name).cloned()
        };
        match ctrl {
            Some(ctrl) => {
                self.enqueue(EngineOp::DependsUpdateSpec(ctrl, spec)).await;
                Ok(())
            }
            None => Err(OrcError::DependencyPodNotExists),
        }
    }

    pub async fn remove_dependency_pod(self: &Arc<Self>, name: &str, force: bool) -> OrcResult<()> {
        let ctrl = {
            let mut regs = self.registries.write().await;
            let ctrl = regs
                .depends_ctrls
                .remove(name)
                .ok_or(OrcError::DependencyPodNotExists)?;
            regs.rm_dep_ctrls.insert(name.to_string(), ctrl.clone());
            ctrl
        };
        self.enqueue(EngineOp::DependsRemoveSpec(ctrl.clone(), force)).await;
        let engine = self.clone();
        let name = name.to_string();
        tokio::spawn(async move { engine.check_depends_remove_result(name, ctrl).await });
        Ok(())
    }

    // ------------------------------------------------------------------
    // constraints, notifies, nodes
    // ------------------------------------------------------------------

    pub async fn get_nodes(&self) -> OrcResult<Vec<Node>> {
        Ok(self.cluster.get_resources().await?)
    }

    pub async fn get_constraint(&self, constraint_type: &str) -> Option<ConstraintSpec> {
        self.constraints.get(constraint_type).await
    }

    pub async fn update_constraint(&self, spec: ConstraintSpec) -> OrcResult<()> {
        Ok(self.constraints.set(spec, self.store.as_ref()).await?)
    }

    pub async fn delete_constraint(&self, constraint_type: &str) -> OrcResult<()> {
        if self.constraints.get(constraint_type).await.is_none() {
            return Err(OrcError::ConstraintNotExists);
        }
        Ok(self.constraints.remove(constraint_type, self.store.as_ref()).await?)
    }

    pub async fn get_notifies(&self) -> Vec<String> {
        self.notifier.callbacks().await
    }

    pub async fn add_notify(&self, callback: &str) -> OrcResult<()> {
        Ok(self.notifier.add(callback, self.store.as_ref()).await?)
    }

    pub async fn delete_notify(&self, callback: &str) -> OrcResult<()> {
        if !self.notifier.contains(callback).await {
            return Err(OrcError::NotifyNotExists);
        }
        Ok(self.notifier.remove(callback, self.store.as_ref()).await?)
    }

    pub fn notifier(&self) -> &Arc<NotifyController> {
        &self.notifier
    }

    // ------------------------------------------------------------------
    // config, guard, lifecycle
    // ------------------------------------------------------------------

    pub async fn config(&self) -> EngineConfig {
        *self.config.read().await
    }

    pub async fn set_config(&self, config: EngineConfig) {
        *self.config.write().await = config;
        if let Err(err) = self.store.set(&keys::engine_config(), &config, true).await {
            warn!(%err, "engine config persistence failed");
        }
    }

    pub async fn set_maintenance(&self, maintenance: bool) {
        self.config.write().await.maintenance = maintenance;
    }

    pub async fn read_only(&self) -> bool {
        let config = self.config.read().await;
        config.read_only || config.maintenance
    }

    /// Tell a watching standby peer this engine is going dormant.
    pub async fn guard_goto_sleep(&self) -> bool {
        self.write_guard(false).await
    }

    /// Tell a watching standby peer this engine is active.
    pub async fn guard_goto_work(&self) -> bool {
        self.write_guard(true).await
    }

    async fn write_guard(&self, working: bool) -> bool {
        let state = GuardState {
            working,
            since: Utc::now(),
        };
        match self.store.set(&keys::guard(), &state, true).await {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "guard flag persistence failed");
                false
            }
        }
    }

    /// Idempotent: a started engine ignores further starts.
    pub fn start(self: &Arc<Self>) {
        let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
        if stop.is_some() {
            debug!("engine already started, ignoring");
            return;
        }
        info!("starting engine");
        let (tx, rx) = watch::channel(false);
        *stop = Some(tx);
        tokio::spawn(worker::run_operation_worker(self.clone(), rx.clone()));
        tokio::spawn(monitor::run_cluster_monitor(self.clone(), rx));
    }

    /// Idempotent: signals the workers and clears the stop slot without
    /// waiting for them to drain.
    pub fn stop(&self) {
        let sender = {
            let mut stop = self.stop.lock().unwrap_or_else(|e| e.into_inner());
            stop.take()
        };
        match sender {
            Some(tx) => {
                info!("stopping engine");
                let _ = tx.send(true);
            }
            None => debug!("engine already stopped, ignoring"),
        }
    }

    pub fn started(&self) -> bool {
        self.stop.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    // ------------------------------------------------------------------
    // cluster health accounting (driven by the monitor)
    // ------------------------------------------------------------------

    pub(crate) async fn cluster_request_failed(&self) {
        let count = self.cluster_fail_count.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = self.timings.cluster_failed_threshold;
        if threshold > 0 && count >= threshold && count % threshold == 0 {
            warn!(failures = count, "cluster event stream degraded");
            self.notifier.send(NotifySpec::cluster_unhealthy()).await;
        }
    }

    pub(crate) fn cluster_request_succeeded(&self) {
        self.cluster_fail_count.store(0, Ordering::SeqCst);
    }

    /// Consecutive cluster failures since the last success.
    pub fn cluster_failures(&self) -> u32 {
        self.cluster_fail_count.load(Ordering::SeqCst)
    }

    pub(crate) fn on_cluster_node_lost(&self, node_name: &str, down_count: u32) {
        warn!(
            %node_name,
            down_count,
            "cluster node is down, checking whether the engine must stop"
        );
        if down_count >= self.timings.max_down_node {
            warn!("too many cluster nodes lost in a short period, stopping the engine");
            self.stop();
        }
    }

    // ------------------------------------------------------------------
    // admission
    // ------------------------------------------------------------------

    /// Admission heuristic for spec changes: homogeneous single-container
    /// pods, memory only. Counts each node's free memory plus whatever
    /// this group already occupies there.
    async fn has_enough_resource(&self, ctrl: &PodGroupController, new_spec: &PodSpec) -> bool {
        let Ok(resources) = self.cluster.get_resources().await else {
            return false;
        };
        let bundle = ctrl.inspect().await;
        let needed = bundle.spec.num_instances;
        let per_pod = new_spec.memory_per_instance();
        if per_pod <= 0 {
            return true;
        }
        let old_per_pod = bundle.spec.pod.memory_per_instance();
        let mut available = 0usize;
        for node in &resources {
            let mut free = node.free_memory();
            let here = bundle
                .pod_group
                .pods
                .iter()
                .filter(|p| p.node_name == node.name)
                .count() as i64;
            free += here * old_per_pod;
            if free > 0 {
                available += (free / per_pod) as usize;
            }
            if available >= needed {
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // janitors
    // ------------------------------------------------------------------

    async fn check_pod_group_remove_result(
        self: Arc<Self>,
        name: String,
        ctrl: Arc<PodGroupController>,
    ) {
        let timeout = tokio::time::sleep(self.timings.janitor_timeout);
        tokio::pin!(timeout);
        let poll = self.timings.janitor_poll;
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + poll, poll);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if ctrl.is_removed() {
                        info!(%name, "pod group safely removed");
                        self.registries.write().await.rm_pg_ctrls.remove(&name);
                        return;
                    }
                }
                _ = &mut timeout => {
                    error!(%name, "timeout waiting for pod group removal; registry entry dropped, cluster state needs manual reconciliation");
                    self.registries.write().await.rm_pg_ctrls.remove(&name);
                    return;
                }
            }
        }
    }

    async fn check_depends_remove_result(
        self: Arc<Self>,
        name: String,
        ctrl: Arc<DependsController>,
    ) {
        let poll = self.timings.janitor_poll;
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + poll, poll);
        loop {
            tick.tick().await;
            match ctrl.remove_status() {
                RemoveStatus::Removed => {
                    info!(%name, "dependency pod safely removed");
                    self.registries.write().await.rm_dep_ctrls.remove(&name);
                    return;
                }
                RemoveStatus::InUse => {
                    info!(%name, "dependency pod still referenced, returning it to service");
                    ctrl.reset_removal();
                    let mut regs = self.registries.write().await;
                    regs.rm_dep_ctrls.remove(&name);
                    regs.depends_ctrls.insert(name.clone(), ctrl.clone());
                    return;
                }
                RemoveStatus::Pending => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // loaders
    // ------------------------------------------------------------------

    pub(crate) async fn load_depends_pods(self: &Arc<Self>) -> OrcResult<()> {
        let mut ctrls = HashMap::new();
        let spec_keys = match self.store.keys_by_prefix(&keys::depends_spec_dir()).await {
            Ok(keys) => keys,
            Err(err) if err.is_missing() => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        for key in spec_keys {
            let spec: PodSpec = self.store.get(&key).await.map_err(|err| {
                error!(%key, %err, "failed to load dependency pod spec");
                err
            })?;
            let pods = match self
                .store
                .get::<NamespacePodsWithSpec>(&keys::depends_pods(&spec.name))
                .await
            {
                Ok(pods) => Some(pods),
                Err(err) if err.is_missing() => {
                    // A spec without runtime instances is legal.
                    warn!(name = %spec.name, "dependency pod has no runtime state yet");
                    None
                }
                Err(err) => {
                    error!(name = %spec.name, %err, "failed to load dependency pod runtime");
                    return Err(err.into());
                }
            };
            info!(name = %spec.name, "loaded depends controller");
            ctrls.insert(spec.name.clone(), self.init_depends_ctrl(spec, pods));
        }
        self.registries.write().await.depends_ctrls = ctrls;
        Ok(())
    }

    pub(crate) async fn load_pod_groups(self: &Arc<Self>) -> OrcResult<()> {
        let mut ctrls = HashMap::new();
        let namespaces = match self.store.keys_by_prefix(&keys::pod_group_dir()).await {
            Ok(keys) => keys,
            Err(err) if err.is_missing() => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        for ns_key in namespaces {
            let names = match self.store.keys_by_prefix(&ns_key).await {
                Ok(keys) => keys,
                Err(err) if err.is_missing() => continue,
                Err(err) => return Err(err.into()),
            };
            for name_key in names {
                let bundle: PodGroupWithSpec = self.store.get(&name_key).await.map_err(|err| {
                    error!(key = %name_key, %err, "failed to load pod group");
                    err
                })?;
                info!(name = %bundle.spec.name, "loaded pod group controller");
                let ctrl =
                    self.init_pod_group_ctrl(bundle.spec.clone(), bundle.prev_state, bundle.pod_group);
                ctrls.insert(bundle.spec.name, ctrl);
            }
        }
        self.registries.write().await.pg_ctrls = ctrls;
        Ok(())
    }

    /// Apply config changes a peer (or operator) writes to the store.
    fn watch_engine_config(self: &Arc<Self>) {
        let engine = Arc::downgrade(self);
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Some(engine) = engine.upgrade() {
                if let Ok(config) = store.get::<EngineConfig>(&keys::engine_config()).await {
                    *engine.config.write().await = config;
                }
            }
            let mut rx = store.watch(&keys::engine_config()).await;
            while let Some(raw) = rx.recv().await {
                let Some(engine) = engine.upgrade() else { return };
                match serde_json::from_str::<EngineConfig>(&raw) {
                    Ok(config) => {
                        info!(?config, "engine config updated from store");
                        *engine.config.write().await = config;
                    }
                    Err(err) => warn!(%err, "ignoring malformed engine config from store"),
                }
            }
        });
    }
}

/// Routes dependency events published by pod-group controllers back
/// through the operation queue.
struct EngineListener {
    engine: Weak<OrcEngine>,
}

impl Listener for EngineListener {
    fn listener_id(&self) -> String {
        "orc_engine".to_string()
    }

    fn handle_event(&self, event: &BusEvent) {
        let BusEvent::Dependency(event) = event;
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        let event = event.clone();
        tokio::spawn(async move {
            let ctrl = {
                let regs = engine.registries.read().await;
                regs.depends_ctrls.get(event.name()).cloned()
            };
            match ctrl {
                Some(ctrl) => {
                    debug!(name = event.name(), "dispatching dependency event");
                    engine.enqueue(EngineOp::DependsDispatch(ctrl, event)).await;
                }
                None => {
                    warn!(name = event.name(), "dependency event for unknown dependency pod");
                }
            }
        });
    }
}
