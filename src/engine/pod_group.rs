//! Pod-group controller.
//!
//! Owns one named pod group: its spec, its per-instance runtime state, and
//! a mailbox whose single worker serializes every mutation. External
//! callers only enqueue; the engine's operation worker forwards targeted
//! operations here and the refresh scheduler feeds periodic reconciles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    render_container_name, DependencyEvent, HealthState, Node, PgOpState, Pod, PodGroup,
    PodGroupSpec, PodGroupWithSpec, PodPrevState, PodSpec, RestartPolicy,
};
use crate::domain::ports::cluster::{Cluster, ClusterError, ContainerCreateOptions};
use crate::domain::ports::store::{Store, StoreExt};

use super::eagle_view::EagleView;
use super::keys;
use super::publisher::{BusEvent, Listener, Publisher};

const MAILBOX_DEPTH: usize = 100;

/// Everything a sub-controller needs once attached to the engine.
pub(crate) struct ControllerContext {
    pub cluster: Arc<dyn Cluster>,
    pub store: Arc<dyn Store>,
    pub eagle_view: Arc<EagleView>,
    /// How long a deploy waits for a health-checked instance to report
    /// healthy before moving on.
    pub launch_wait: Duration,
    /// How long an unreferenced dependency instance survives before the
    /// next refresh collects it.
    pub depends_gc_grace: Duration,
}

/// Start/stop/restart verbs accepted by the change-state operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStateOp {
    Stop,
    Start,
    Restart,
}

impl ChangeStateOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "stop" => Some(Self::Stop),
            "start" => Some(Self::Start),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }

    pub fn target_op_state(&self) -> PgOpState {
        match self {
            Self::Stop => PgOpState::Stopping,
            Self::Start => PgOpState::Starting,
            Self::Restart => PgOpState::Restarting,
        }
    }
}

/// Operations serialized on the controller's mailbox.
#[derive(Debug)]
pub enum PgOp {
    Deploy,
    Refresh { force: bool },
    RefreshInstance { instance: usize },
    Remove,
    RescheduleInstances {
        num_instances: usize,
        restart_policy: Option<RestartPolicy>,
    },
    RescheduleSpec { pod_spec: PodSpec },
    ChangeState { op: ChangeStateOp, instance: usize },
    Drift {
        from_node: String,
        to_node: String,
        instance: usize,
        force: bool,
    },
    UpdateHealth { instance: usize, health: HealthState },
    SaveStore { force: bool },
}

struct PgInner {
    spec: PodGroupSpec,
    group: PodGroup,
}

pub struct PodGroupController {
    name: String,
    namespace: String,
    inner: RwLock<PgInner>,
    op_state: AtomicU8,
    refreshable: AtomicBool,
    removed: AtomicBool,
    ops_tx: mpsc::Sender<PgOp>,
    ops_rx: Mutex<Option<mpsc::Receiver<PgOp>>>,
    ctx: OnceLock<ControllerContext>,
    publisher: Publisher,
    launches: RwLock<HashMap<usize, Arc<Notify>>>,
}

impl PodGroupController {
    pub fn new(spec: PodGroupSpec, prev_states: Vec<PodPrevState>, mut group: PodGroup) -> Arc<Self> {
        // A reloaded group may come back with placement only in the
        // persisted previous-state vector.
        if group.pods.is_empty() && !prev_states.is_empty() {
            group.pods = prev_states
                .iter()
                .map(|prev| Pod {
                    instance_no: prev.instance_no,
                    node_name: prev.node_name.clone(),
                    container_id: prev.container_id.clone(),
                    ..Pod::default()
                })
                .collect();
        }
        let (ops_tx, ops_rx) = mpsc::channel(MAILBOX_DEPTH);
        Arc::new(Self {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            inner: RwLock::new(PgInner { spec, group }),
            op_state: AtomicU8::new(PgOpState::Idle as u8),
            refreshable: AtomicBool::new(true),
            removed: AtomicBool::new(false),
            ops_tx,
            ops_rx: Mutex::new(Some(ops_rx)),
            ctx: OnceLock::new(),
            publisher: Publisher::new(true),
            launches: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.publisher.add_listener(listener);
    }

    /// Attach cluster, store, and eagle view, and spawn the mailbox
    /// worker. Activation itself triggers no operation.
    pub(crate) fn activate(self: &Arc<Self>, ctx: ControllerContext) {
        if self.ctx.set(ctx).is_err() {
            warn!(name = %self.name, "pod group controller already activated");
            return;
        }
        let rx = self.ops_rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rx) = rx {
            let ctrl = self.clone();
            tokio::spawn(async move { ctrl.run(rx).await });
        }
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<PgOp>) {
        while let Some(op) = rx.recv().await {
            self.handle(op).await;
        }
        debug!(name = %self.name, "pod group mailbox closed");
    }

    pub async fn enqueue(&self, op: PgOp) {
        if self.ops_tx.send(op).await.is_err() {
            warn!(name = %self.name, "pod group mailbox gone, operation dropped");
        }
    }

    pub async fn inspect(&self) -> PodGroupWithSpec {
        let inner = self.inner.read().await;
        PodGroupWithSpec {
            spec: inner.spec.clone(),
            prev_state: inner.group.prev_states(),
            pod_group: inner.group.clone(),
        }
    }

    /// Claim the operation lock for `target`. Returns `Idle` when the
    /// claim succeeded; otherwise the state currently holding the lock.
    pub fn can_operate(&self, target: PgOpState) -> PgOpState {
        match self.op_state.compare_exchange(
            PgOpState::Idle as u8,
            target as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => PgOpState::Idle,
            Err(current) => PgOpState::from_u8(current),
        }
    }

    pub fn op_state(&self) -> PgOpState {
        PgOpState::from_u8(self.op_state.load(Ordering::SeqCst))
    }

    /// Hand a claimed operation lock back without running the operation
    /// (admission rejection path).
    pub fn release_operation(&self) {
        self.set_op_state(PgOpState::Idle);
    }

    fn set_op_state(&self, state: PgOpState) {
        self.op_state.store(state as u8, Ordering::SeqCst);
    }

    pub fn refreshable(&self) -> bool {
        self.refreshable.load(Ordering::SeqCst)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub async fn set_last_error(&self, message: &str) {
        let mut inner = self.inner.write().await;
        inner.group.last_error = message.to_string();
        inner.group.updated_at = Some(Utc::now());
    }

    async fn launch_signal(&self, instance: usize) -> Arc<Notify> {
        let mut launches = self.launches.write().await;
        launches.entry(instance).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    // ------------------------------------------------------------------
    // mailbox handlers
    // ------------------------------------------------------------------

    async fn handle(&self, op: PgOp) {
        let Some(ctx) = self.ctx.get() else {
            warn!(name = %self.name, "operation before activation, dropped");
            return;
        };
        match op {
            PgOp::Deploy => self.deploy(ctx).await,
            PgOp::Refresh { force } => self.refresh(ctx, force).await,
            PgOp::RefreshInstance { instance } => self.refresh_instance(ctx, instance).await,
            PgOp::Remove => self.remove(ctx).await,
            PgOp::RescheduleInstances { num_instances, restart_policy } => {
                self.reschedule_instances(ctx, num_instances, restart_policy).await;
            }
            PgOp::RescheduleSpec { pod_spec } => self.reschedule_spec(ctx, pod_spec).await,
            PgOp::ChangeState { op, instance } => self.change_state(ctx, op, instance).await,
            PgOp::Drift { from_node, to_node, instance, force } => {
                self.drift(ctx, &from_node, &to_node, instance, force).await;
            }
            PgOp::UpdateHealth { instance, health } => self.update_health(ctx, instance, health).await,
            PgOp::SaveStore { force } => self.save(ctx, force).await,
        }
    }

    async fn deploy(&self, ctx: &ControllerContext) {
        self.set_op_state(PgOpState::Deploying);
        self.refreshable.store(false, Ordering::SeqCst);
        let spec = self.inner.read().await.spec.clone();
        info!(name = %self.name, instances = spec.num_instances, "deploying pod group");
        let mut pods = Vec::with_capacity(spec.num_instances);
        for instance in 1..=spec.num_instances {
            let pod = self.deploy_instance(ctx, &spec, instance, &pods, None).await;
            pods.push(pod);
        }
        {
            let mut inner = self.inner.write().await;
            inner.group.last_error = pods
                .iter()
                .find(|p| !p.last_error.is_empty())
                .map(|p| p.last_error.clone())
                .unwrap_or_default();
            inner.group.pods = pods;
            inner.group.stopped = false;
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, true).await;
        self.refreshable.store(true, Ordering::SeqCst);
        self.set_op_state(PgOpState::Idle);
    }

    /// Create and start one instance. Failures land on the returned pod's
    /// `last_error`; the group is never unwound.
    async fn deploy_instance(
        &self,
        ctx: &ControllerContext,
        spec: &PodGroupSpec,
        instance: usize,
        placed: &[Pod],
        node_override: Option<&str>,
    ) -> Pod {
        let mut pod = Pod::new(instance);
        pod.updated_at = Some(Utc::now());
        let Some(container) = spec.pod.containers.first() else {
            pod.last_error = "pod spec has no containers".to_string();
            return pod;
        };
        let node = match node_override {
            Some(node) if !node.is_empty() => Some(node.to_string()),
            _ => self.select_node(ctx, spec, placed, None).await,
        };
        let Some(node) = node else {
            pod.last_error = "no cluster nodes available".to_string();
            warn!(name = %self.name, instance, "no node to place instance on");
            return pod;
        };
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
        let opts = ContainerCreateOptions {
            name: render_container_name(&spec.name, &spec.namespace, instance, &suffix),
            image: container.image.clone(),
            command: container.command.clone(),
            env: container.env.clone(),
            memory_limit: container.memory_limit,
            cpu_limit: container.cpu_limit,
            node_name: node.clone(),
        };
        let id = match ctx.cluster.create_container(&opts).await {
            Ok(id) => id,
            Err(err) => {
                pod.last_error = err.to_string();
                warn!(name = %self.name, instance, %err, "container create failed");
                return pod;
            }
        };
        if let Err(err) = ctx.cluster.start_container(&id).await {
            pod.container_id = id;
            pod.node_name = node;
            pod.last_error = err.to_string();
            warn!(name = %self.name, instance, %err, "container start failed");
            return pod;
        }
        pod.container_id = id;
        pod.node_name = node.clone();
        pod.running = true;
        if container.health_check.is_some() {
            let signal = self.launch_signal(instance).await;
            if tokio::time::timeout(ctx.launch_wait, signal.notified()).await.is_err() {
                debug!(name = %self.name, instance, "launch wait elapsed without healthy report");
            }
        }
        self.emit_dependency_events(spec, &node, true);
        pod
    }

    /// Bin-pack by memory: place on the node with the most headroom after
    /// accounting for instances this deploy already placed. Assumes
    /// homogeneous single-container pods; memory is the only dimension.
    async fn select_node(
        &self,
        ctx: &ControllerContext,
        spec: &PodGroupSpec,
        placed: &[Pod],
        exclude_node: Option<&str>,
    ) -> Option<String> {
        let resources = match ctx.cluster.get_resources().await {
            Ok(resources) => resources,
            Err(err) => {
                warn!(name = %self.name, %err, "resource listing failed");
                return None;
            }
        };
        let per_pod = spec.pod.memory_per_instance();
        let candidate = |node: &Node| -> Option<(String, i64)> {
            if exclude_node == Some(node.name.as_str()) {
                return None;
            }
            if !spec.node_hints.is_empty() && !spec.node_hints.contains(&node.name) {
                return None;
            }
            let here = placed.iter().filter(|p| p.node_name == node.name).count() as i64;
            let headroom = node.free_memory() - here * per_pod;
            if per_pod > 0 && headroom < per_pod {
                return None;
            }
            Some((node.name.clone(), headroom))
        };
        resources
            .iter()
            .filter_map(candidate)
            .max_by_key(|(_, headroom)| *headroom)
            .map(|(name, _)| name)
    }

    async fn refresh(&self, ctx: &ControllerContext, force: bool) {
        if self.is_removed() {
            return;
        }
        let (spec, stopped) = {
            let inner = self.inner.read().await;
            (inner.spec.clone(), inner.group.stopped)
        };
        let runtime = match ctx.eagle_view.refresh_pod_group(ctx.cluster.as_ref(), &spec.name).await {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(name = %self.name, %err, "refresh skipped, cluster listing failed");
                return;
            }
        };
        let mut pods = self.inner.read().await.group.pods.clone();
        for instance in 1..=spec.num_instances {
            if !pods.iter().any(|p| p.instance_no == instance) {
                pods.push(Pod::new(instance));
            }
        }
        pods.retain(|p| p.instance_no <= spec.num_instances);
        pods.sort_by_key(|p| p.instance_no);
        for pod in &mut pods {
            let before = pod.clone();
            let observed = runtime
                .iter()
                .filter(|c| c.instance_no == pod.instance_no)
                .max_by_key(|c| c.running);
            match observed {
                Some(container) => {
                    pod.container_id = container.id.clone();
                    if !container.node_name.is_empty() {
                        pod.node_name = container.node_name.clone();
                    }
                    if container.running {
                        pod.running = true;
                        pod.last_error.clear();
                    } else {
                        self.revive_instance(ctx, &spec, pod, stopped).await;
                    }
                }
                None => {
                    if stopped || spec.restart_policy == RestartPolicy::Never {
                        pod.running = false;
                        pod.container_id.clear();
                    } else {
                        self.recreate_instance(ctx, &spec, pod).await;
                    }
                }
            }
            // Stamp only real changes; an untouched record must serialize
            // identically so the hash check suppresses the save.
            if *pod != before {
                pod.updated_at = Some(Utc::now());
            }
        }
        // Instances past the spec'd count are leftovers from an
        // interrupted scale-down.
        for orphan in runtime.iter().filter(|c| c.instance_no > spec.num_instances) {
            let _ = ctx.cluster.stop_container(&orphan.id).await;
            match ctx.cluster.remove_container(&orphan.id).await {
                Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                Err(err) => warn!(name = %self.name, id = %orphan.id, %err, "orphan cleanup failed"),
            }
        }
        {
            let mut inner = self.inner.write().await;
            inner.group.pods = pods;
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, force).await;
    }

    /// Bring one dead-but-present container back per the restart policy.
    async fn revive_instance(
        &self,
        ctx: &ControllerContext,
        spec: &PodGroupSpec,
        pod: &mut Pod,
        stopped: bool,
    ) {
        pod.running = false;
        if stopped {
            return;
        }
        let exit_code = match ctx.cluster.inspect_container(&pod.container_id).await {
            Ok(detail) => detail.exit_code,
            Err(_) => 0,
        };
        let restart = match spec.restart_policy {
            RestartPolicy::Always => true,
            RestartPolicy::OnFail => exit_code != 0,
            RestartPolicy::Never => false,
        };
        if !restart {
            return;
        }
        match ctx.cluster.restart_container(&pod.container_id).await {
            Ok(()) => {
                pod.running = true;
                pod.last_error.clear();
            }
            Err(ClusterError::ContainerNotFound(_)) => {
                self.recreate_instance(ctx, spec, pod).await;
            }
            Err(err) => {
                pod.last_error = err.to_string();
                warn!(name = %self.name, instance = pod.instance_no, %err, "restart failed");
            }
        }
    }

    /// Replace a vanished container with a fresh one, retiring the old
    /// placement's dependency refs.
    async fn recreate_instance(&self, ctx: &ControllerContext, spec: &PodGroupSpec, pod: &mut Pod) {
        if !pod.node_name.is_empty() {
            self.emit_dependency_events(spec, &pod.node_name.clone(), false);
        }
        info!(name = %self.name, instance = pod.instance_no, "recreating instance");
        let fresh = self.deploy_instance(ctx, spec, pod.instance_no, &[], None).await;
        *pod = fresh;
    }

    async fn refresh_instance(&self, ctx: &ControllerContext, instance: usize) {
        if self.is_removed() {
            return;
        }
        let (spec, stopped) = {
            let inner = self.inner.read().await;
            (inner.spec.clone(), inner.group.stopped)
        };
        let mut pod = {
            let inner = self.inner.read().await;
            match inner.group.pods.iter().find(|p| p.instance_no == instance) {
                Some(pod) => pod.clone(),
                None => {
                    warn!(name = %self.name, instance, "refresh for unknown instance");
                    return;
                }
            }
        };
        if pod.container_id.is_empty() {
            if !stopped && spec.restart_policy != RestartPolicy::Never {
                self.recreate_instance(ctx, &spec, &mut pod).await;
            }
        } else {
            match ctx.cluster.inspect_container(&pod.container_id).await {
                Ok(detail) if detail.running => {
                    pod.running = true;
                    pod.last_error.clear();
                }
                Ok(_) => self.revive_instance(ctx, &spec, &mut pod, stopped).await,
                Err(ClusterError::ContainerNotFound(_)) => {
                    if !stopped && spec.restart_policy != RestartPolicy::Never {
                        self.recreate_instance(ctx, &spec, &mut pod).await;
                    } else {
                        pod.running = false;
                        pod.container_id.clear();
                    }
                }
                Err(err) => {
                    warn!(name = %self.name, instance, %err, "instance inspect failed");
                    return;
                }
            }
        }
        pod.updated_at = Some(Utc::now());
        {
            let mut inner = self.inner.write().await;
            if let Some(slot) = inner.group.pods.iter_mut().find(|p| p.instance_no == instance) {
                *slot = pod;
            }
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, true).await;
    }

    async fn remove(&self, ctx: &ControllerContext) {
        self.set_op_state(PgOpState::Removing);
        self.refreshable.store(false, Ordering::SeqCst);
        let (spec, pods) = {
            let inner = self.inner.read().await;
            (inner.spec.clone(), inner.group.pods.clone())
        };
        info!(name = %self.name, "removing pod group");
        let mut clean = true;
        for pod in &pods {
            if pod.container_id.is_empty() {
                continue;
            }
            let _ = ctx.cluster.stop_container(&pod.container_id).await;
            match ctx.cluster.remove_container(&pod.container_id).await {
                Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                Err(err) => {
                    clean = false;
                    error!(name = %self.name, instance = pod.instance_no, %err, "container removal failed");
                }
            }
            if !pod.node_name.is_empty() {
                self.emit_dependency_events(&spec, &pod.node_name, false);
            }
        }
        match ctx.store.remove(&keys::pod_group(&self.namespace, &self.name)).await {
            Ok(()) => {}
            Err(err) if err.is_missing() => {}
            Err(err) => {
                clean = false;
                error!(name = %self.name, %err, "store removal failed");
            }
        }
        ctx.store.try_remove_dir(&keys::pod_history_dir(&self.name)).await;
        if clean {
            self.removed.store(true, Ordering::SeqCst);
        }
    }

    async fn reschedule_instances(
        &self,
        ctx: &ControllerContext,
        num_instances: usize,
        restart_policy: Option<RestartPolicy>,
    ) {
        self.refreshable.store(false, Ordering::SeqCst);
        let mut spec = self.inner.read().await.spec.clone();
        let mut pods = self.inner.read().await.group.pods.clone();
        let old = spec.num_instances;
        info!(name = %self.name, from = old, to = num_instances, "rescheduling instance count");
        if let Some(policy) = restart_policy {
            spec.restart_policy = policy;
        }
        spec.num_instances = num_instances;
        if num_instances > old {
            for instance in (old + 1)..=num_instances {
                let pod = self.deploy_instance(ctx, &spec, instance, &pods, None).await;
                pods.push(pod);
            }
        } else if num_instances < old {
            for pod in pods.iter().filter(|p| p.instance_no > num_instances) {
                if pod.container_id.is_empty() {
                    continue;
                }
                let _ = ctx.cluster.stop_container(&pod.container_id).await;
                match ctx.cluster.remove_container(&pod.container_id).await {
                    Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                    Err(err) => warn!(name = %self.name, instance = pod.instance_no, %err, "scale-down removal failed"),
                }
                if !pod.node_name.is_empty() {
                    self.emit_dependency_events(&spec, &pod.node_name, false);
                }
            }
            pods.retain(|p| p.instance_no <= num_instances);
        }
        {
            let mut inner = self.inner.write().await;
            inner.spec = spec;
            inner.group.pods = pods;
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, true).await;
        self.refreshable.store(true, Ordering::SeqCst);
        self.set_op_state(PgOpState::Idle);
    }

    async fn reschedule_spec(&self, ctx: &ControllerContext, pod_spec: PodSpec) {
        // The scheduler claimed the lock as Scheduling; switch to
        // Upgrading so die events during the roll are ignored.
        self.set_op_state(PgOpState::Upgrading);
        self.refreshable.store(false, Ordering::SeqCst);
        let spec = {
            let mut inner = self.inner.write().await;
            let old = &inner.spec.pod;
            let mut next = pod_spec;
            next.name = old.name.clone();
            next.namespace = inner.spec.namespace.clone();
            next.version = old.version + 1;
            next.created_at = old.created_at;
            next.updated_at = Some(Utc::now());
            inner.spec.pod = next;
            inner.spec.clone()
        };
        info!(name = %self.name, version = spec.pod.version, "rolling pod group to new spec");
        for instance in 1..=spec.num_instances {
            let old = {
                let inner = self.inner.read().await;
                inner.group.pods.iter().find(|p| p.instance_no == instance).cloned()
            };
            if let Some(old) = old {
                if !old.container_id.is_empty() {
                    let _ = ctx.cluster.stop_container(&old.container_id).await;
                    match ctx.cluster.remove_container(&old.container_id).await {
                        Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                        Err(err) => {
                            warn!(name = %self.name, instance, %err, "old container removal failed during upgrade");
                        }
                    }
                }
                if !old.node_name.is_empty() {
                    self.emit_dependency_events(&spec, &old.node_name, false);
                }
            }
            let fresh = self.deploy_instance(ctx, &spec, instance, &[], None).await;
            let mut inner = self.inner.write().await;
            match inner.group.pods.iter_mut().find(|p| p.instance_no == instance) {
                Some(slot) => *slot = fresh,
                None => inner.group.pods.push(fresh),
            }
        }
        {
            let mut inner = self.inner.write().await;
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, true).await;
        self.refreshable.store(true, Ordering::SeqCst);
        self.set_op_state(PgOpState::Idle);
    }

    /// `instance == 0` addresses the whole group.
    async fn change_state(&self, ctx: &ControllerContext, op: ChangeStateOp, instance: usize) {
        self.refreshable.store(false, Ordering::SeqCst);
        let mut pods = self.inner.read().await.group.pods.clone();
        info!(name = %self.name, ?op, instance, "changing pod group state");
        for pod in pods
            .iter_mut()
            .filter(|p| instance == 0 || p.instance_no == instance)
        {
            if pod.container_id.is_empty() {
                continue;
            }
            let result = match op {
                ChangeStateOp::Stop => ctx.cluster.stop_container(&pod.container_id).await,
                ChangeStateOp::Start => ctx.cluster.start_container(&pod.container_id).await,
                ChangeStateOp::Restart => ctx.cluster.restart_container(&pod.container_id).await,
            };
            match result {
                Ok(()) => {
                    pod.running = !matches!(op, ChangeStateOp::Stop);
                    pod.last_error.clear();
                }
                Err(err) => {
                    pod.last_error = err.to_string();
                    warn!(name = %self.name, instance = pod.instance_no, %err, "state change failed");
                }
            }
            pod.updated_at = Some(Utc::now());
        }
        {
            let mut inner = self.inner.write().await;
            inner.group.pods = pods;
            if instance == 0 {
                inner.group.stopped = matches!(op, ChangeStateOp::Stop);
            }
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, true).await;
        self.refreshable.store(true, Ordering::SeqCst);
        self.set_op_state(PgOpState::Idle);
    }

    /// Relocate instances off `from_node`. Without `force` only instances
    /// whose container is no longer running are moved (the node-loss
    /// case); with it every matching instance drifts.
    async fn drift(
        &self,
        ctx: &ControllerContext,
        from_node: &str,
        to_node: &str,
        instance: usize,
        force: bool,
    ) {
        if self.can_operate(PgOpState::Drifting) != PgOpState::Idle {
            debug!(name = %self.name, "drift skipped, operation in progress");
            return;
        }
        self.refreshable.store(false, Ordering::SeqCst);
        let spec = self.inner.read().await.spec.clone();
        let pods = self.inner.read().await.group.pods.clone();
        let mut moved = 0usize;
        for pod in pods
            .iter()
            .filter(|p| p.node_name == from_node && (instance == 0 || p.instance_no == instance))
        {
            if !force && pod.running {
                continue;
            }
            if !pod.container_id.is_empty() {
                let _ = ctx.cluster.stop_container(&pod.container_id).await;
                match ctx.cluster.remove_container(&pod.container_id).await {
                    Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                    Err(err) => warn!(name = %self.name, instance = pod.instance_no, %err, "drift removal failed"),
                }
            }
            self.emit_dependency_events(&spec, from_node, false);
            let target = if to_node.is_empty() {
                match self.select_node(ctx, &spec, &[], Some(from_node)).await {
                    Some(node) => node,
                    None => {
                        warn!(name = %self.name, instance = pod.instance_no, "no node to drift to");
                        continue;
                    }
                }
            } else {
                to_node.to_string()
            };
            let fresh = self
                .deploy_instance(ctx, &spec, pod.instance_no, &[], Some(&target))
                .await;
            let mut inner = self.inner.write().await;
            if let Some(slot) = inner.group.pods.iter_mut().find(|p| p.instance_no == pod.instance_no) {
                *slot = fresh;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(name = %self.name, from_node, to_node, moved, "drifted instances");
            let mut inner = self.inner.write().await;
            let policy = inner.spec.restart_policy;
            let num = inner.spec.num_instances;
            inner.group.evaluate_state(policy, num);
        }
        self.save(ctx, true).await;
        self.refreshable.store(true, Ordering::SeqCst);
        self.set_op_state(PgOpState::Idle);
    }

    async fn update_health(&self, ctx: &ControllerContext, instance: usize, health: HealthState) {
        {
            let mut inner = self.inner.write().await;
            let Some(pod) = inner.group.pods.iter_mut().find(|p| p.instance_no == instance) else {
                return;
            };
            pod.health = health;
            pod.updated_at = Some(Utc::now());
        }
        if health == HealthState::Healthy {
            self.launch_signal(instance).await.notify_one();
        }
        self.save(ctx, true).await;
    }

    async fn save(&self, ctx: &ControllerContext, force: bool) {
        let bundle = self.inspect().await;
        let key = keys::pod_group(&self.namespace, &self.name);
        if let Err(err) = ctx.store.set(&key, &bundle, force).await {
            error!(name = %self.name, %err, "pod group persistence failed");
        }
    }

    fn emit_dependency_events(&self, spec: &PodGroupSpec, node_name: &str, add: bool) {
        for dep in &spec.pod.dependencies {
            let event = if add {
                DependencyEvent::Add {
                    name: dep.pod_name.clone(),
                    namespace: spec.namespace.clone(),
                    node_name: node_name.to_string(),
                }
            } else {
                DependencyEvent::Remove {
                    name: dep.pod_name.clone(),
                    namespace: spec.namespace.clone(),
                    node_name: node_name.to_string(),
                }
            };
            self.publisher.emit(BusEvent::Dependency(event));
        }
    }
}
