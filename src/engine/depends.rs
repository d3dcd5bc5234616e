//! Dependency-pod controller.
//!
//! Owns one shared pod spec and its runtime instances, one per
//! `(namespace, node)`, reference-counted by the pod groups that consume
//! them. Consumers never talk to this controller directly: pod-group
//! controllers publish dependency events and the engine routes them here.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::domain::models::{
    DependencyEvent, NamespacePodsWithSpec, Pod, PodSpec, RemoveStatus, SharedPodWithSpec,
};
use crate::domain::ports::cluster::{ClusterError, ContainerCreateOptions};
use crate::domain::ports::store::StoreExt;

use super::keys;
use super::pod_group::ControllerContext;

const MAILBOX_DEPTH: usize = 100;

/// Operations serialized on the controller's mailbox.
#[derive(Debug)]
pub enum DepOp {
    AddSpec,
    UpdateSpec { spec: PodSpec },
    RemoveSpec { force: bool },
    Refresh,
    Dispatch { event: DependencyEvent },
}

struct DepInner {
    spec: PodSpec,
    pods: NamespacePodsWithSpec,
}

pub struct DependsController {
    name: String,
    inner: RwLock<DepInner>,
    remove_status: AtomicU8,
    removing: AtomicBool,
    ops_tx: mpsc::Sender<DepOp>,
    ops_rx: Mutex<Option<mpsc::Receiver<DepOp>>>,
    ctx: OnceLock<ControllerContext>,
}

impl DependsController {
    pub fn new(spec: PodSpec, pods: Option<NamespacePodsWithSpec>) -> Arc<Self> {
        let (ops_tx, ops_rx) = mpsc::channel(MAILBOX_DEPTH);
        Arc::new(Self {
            name: spec.name.clone(),
            inner: RwLock::new(DepInner {
                spec,
                pods: pods.unwrap_or_default(),
            }),
            remove_status: AtomicU8::new(RemoveStatus::Pending as u8),
            removing: AtomicBool::new(false),
            ops_tx,
            ops_rx: Mutex::new(Some(ops_rx)),
            ctx: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn activate(self: &Arc<Self>, ctx: ControllerContext) {
        if self.ctx.set(ctx).is_err() {
            warn!(name = %self.name, "depends controller already activated");
            return;
        }
        let rx = self.ops_rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(rx) = rx {
            let ctrl = self.clone();
            tokio::spawn(async move { ctrl.run(rx).await });
        }
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<DepOp>) {
        while let Some(op) = rx.recv().await {
            self.handle(op).await;
        }
        debug!(name = %self.name, "depends mailbox closed");
    }

    pub async fn enqueue(&self, op: DepOp) {
        if self.ops_tx.send(op).await.is_err() {
            warn!(name = %self.name, "depends mailbox gone, operation dropped");
        }
    }

    pub async fn inspect(&self) -> NamespacePodsWithSpec {
        self.inner.read().await.pods.clone()
    }

    pub async fn spec(&self) -> PodSpec {
        self.inner.read().await.spec.clone()
    }

    /// What the removal janitor polls. `InUse` sends the controller back
    /// to the active registry.
    pub fn remove_status(&self) -> RemoveStatus {
        RemoveStatus::from_u8(self.remove_status.load(Ordering::SeqCst))
    }

    /// Called by the engine when the removal is aborted and the
    /// controller returns to duty.
    pub fn reset_removal(&self) {
        self.removing.store(false, Ordering::SeqCst);
        self.remove_status.store(RemoveStatus::Pending as u8, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // mailbox handlers
    // ------------------------------------------------------------------

    async fn handle(&self, op: DepOp) {
        let Some(ctx) = self.ctx.get() else {
            warn!(name = %self.name, "operation before activation, dropped");
            return;
        };
        match op {
            DepOp::AddSpec => self.add_spec(ctx).await,
            DepOp::UpdateSpec { spec } => self.update_spec(ctx, spec).await,
            DepOp::RemoveSpec { force } => self.remove_spec(ctx, force).await,
            DepOp::Refresh => self.refresh(ctx).await,
            DepOp::Dispatch { event } => self.dispatch(ctx, event).await,
        }
    }

    async fn add_spec(&self, ctx: &ControllerContext) {
        let (spec, pods) = {
            let inner = self.inner.read().await;
            (inner.spec.clone(), inner.pods.clone())
        };
        info!(name = %self.name, "registering dependency pod spec");
        if let Err(err) = ctx.store.set(&keys::depends_spec(&self.name), &spec, false).await {
            warn!(name = %self.name, %err, "dependency spec persistence failed");
        }
        if let Err(err) = ctx.store.set(&keys::depends_pods(&self.name), &pods, false).await {
            warn!(name = %self.name, %err, "dependency pods persistence failed");
        }
    }

    async fn update_spec(&self, ctx: &ControllerContext, new_spec: PodSpec) {
        let spec = {
            let mut inner = self.inner.write().await;
            let mut next = new_spec;
            next.name = inner.spec.name.clone();
            next.version = inner.spec.version + 1;
            next.created_at = inner.spec.created_at;
            next.updated_at = Some(Utc::now());
            inner.spec = next;
            inner.spec.clone()
        };
        info!(name = %self.name, version = spec.version, "rolling dependency instances to new spec");
        let placements: Vec<(String, String)> = {
            let inner = self.inner.read().await;
            inner
                .pods
                .iter()
                .flat_map(|(ns, nodes)| nodes.keys().map(move |node| (ns.clone(), node.clone())))
                .collect()
        };
        for (namespace, node) in placements {
            let old_id = {
                let inner = self.inner.read().await;
                inner
                    .pods
                    .get(&namespace)
                    .and_then(|nodes| nodes.get(&node))
                    .map(|shared| shared.pod.container_id.clone())
            };
            if let Some(old_id) = old_id.filter(|id| !id.is_empty()) {
                let _ = ctx.cluster.stop_container(&old_id).await;
                match ctx.cluster.remove_container(&old_id).await {
                    Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                    Err(err) => warn!(name = %self.name, %err, "old dependency container removal failed"),
                }
            }
            let pod = self.create_instance(ctx, &spec, &namespace, &node).await;
            let mut inner = self.inner.write().await;
            let spec_for_entry = inner.spec.clone();
            if let Some(shared) = inner.pods.get_mut(&namespace).and_then(|nodes| nodes.get_mut(&node)) {
                shared.pod = pod;
                shared.spec = spec_for_entry;
                shared.last_verified = Some(Utc::now());
            }
        }
        if let Err(err) = ctx.store.set(&keys::depends_spec(&self.name), &spec, false).await {
            warn!(name = %self.name, %err, "dependency spec persistence failed");
        }
        self.persist(ctx, true).await;
    }

    async fn remove_spec(&self, ctx: &ControllerContext, force: bool) {
        self.removing.store(true, Ordering::SeqCst);
        let pods = self.inner.read().await.pods.clone();
        let total_refs: usize = pods
            .values()
            .flat_map(|nodes| nodes.values())
            .map(|shared| shared.refcount)
            .sum();
        if total_refs > 0 && !force {
            info!(name = %self.name, total_refs, "dependency still referenced, aborting removal");
            self.remove_status.store(RemoveStatus::InUse as u8, Ordering::SeqCst);
            return;
        }
        info!(name = %self.name, "removing dependency pod");
        for shared in pods.values().flat_map(|nodes| nodes.values()) {
            if shared.pod.container_id.is_empty() {
                continue;
            }
            let _ = ctx.cluster.stop_container(&shared.pod.container_id).await;
            match ctx.cluster.remove_container(&shared.pod.container_id).await {
                Ok(()) | Err(ClusterError::ContainerNotFound(_)) => {}
                Err(err) => warn!(name = %self.name, %err, "dependency container removal failed"),
            }
        }
        match ctx.store.remove(&keys::depends_spec(&self.name)).await {
            Ok(()) => {}
            Err(err) if err.is_missing() => {}
            Err(err) => warn!(name = %self.name, %err, "dependency spec removal failed"),
        }
        match ctx.store.remove(&keys::depends_pods(&self.name)).await {
            Ok(()) => {}
            Err(err) if err.is_missing() => {}
            Err(err) => warn!(name = %self.name, %err, "dependency pods removal failed"),
        }
        self.inner.write().await.pods.clear();
        self.remove_status.store(RemoveStatus::Removed as u8, Ordering::SeqCst);
    }

    /// Reconcile every instance with the cluster; collect instances that
    /// lost their last reference past the grace window.
    async fn refresh(&self, ctx: &ControllerContext) {
        if self.removing.load(Ordering::SeqCst) {
            return;
        }
        let spec = self.inner.read().await.spec.clone();
        let snapshot = self.inner.read().await.pods.clone();
        for (namespace, nodes) in snapshot {
            for (node, shared) in nodes {
                if shared.refcount == 0 {
                    let expired = shared
                        .last_verified
                        .is_none_or(|at| Utc::now() - at > chrono::Duration::from_std(ctx.depends_gc_grace).unwrap_or_default());
                    if expired {
                        debug!(name = %self.name, %namespace, %node, "collecting unreferenced dependency instance");
                        if !shared.pod.container_id.is_empty() {
                            let _ = ctx.cluster.stop_container(&shared.pod.container_id).await;
                            let _ = ctx.cluster.remove_container(&shared.pod.container_id).await;
                        }
                        let mut inner = self.inner.write().await;
                        if let Some(nodes) = inner.pods.get_mut(&namespace) {
                            nodes.remove(&node);
                            if nodes.is_empty() {
                                inner.pods.remove(&namespace);
                            }
                        }
                    }
                    continue;
                }
                let alive = match ctx.cluster.inspect_container(&shared.pod.container_id).await {
                    Ok(detail) if detail.running => true,
                    Ok(detail) => ctx.cluster.restart_container(&detail.id).await.is_ok(),
                    Err(_) => false,
                };
                if alive {
                    let mut inner = self.inner.write().await;
                    if let Some(entry) = inner.pods.get_mut(&namespace).and_then(|n| n.get_mut(&node)) {
                        entry.pod.running = true;
                    }
                } else {
                    info!(name = %self.name, %namespace, %node, "recreating dependency instance");
                    let pod = self.create_instance(ctx, &spec, &namespace, &node).await;
                    let mut inner = self.inner.write().await;
                    if let Some(entry) = inner.pods.get_mut(&namespace).and_then(|n| n.get_mut(&node)) {
                        entry.pod = pod;
                        entry.last_verified = Some(Utc::now());
                    }
                }
            }
        }
        self.persist(ctx, false).await;
    }

    async fn dispatch(&self, ctx: &ControllerContext, event: DependencyEvent) {
        match event {
            DependencyEvent::Add { namespace, node_name, .. } => {
                let existing = {
                    let mut inner = self.inner.write().await;
                    match inner
                        .pods
                        .get_mut(&namespace)
                        .and_then(|nodes| nodes.get_mut(&node_name))
                    {
                        Some(shared) => {
                            shared.refcount += 1;
                            true
                        }
                        None => false,
                    }
                };
                if !existing {
                    let spec = self.inner.read().await.spec.clone();
                    let pod = self.create_instance(ctx, &spec, &namespace, &node_name).await;
                    let mut inner = self.inner.write().await;
                    let spec_for_entry = inner.spec.clone();
                    inner
                        .pods
                        .entry(namespace.clone())
                        .or_default()
                        .insert(
                            node_name.clone(),
                            SharedPodWithSpec {
                                refcount: 1,
                                last_verified: Some(Utc::now()),
                                pod,
                                spec: spec_for_entry,
                            },
                        );
                }
            }
            DependencyEvent::Remove { namespace, node_name, .. } => {
                let mut inner = self.inner.write().await;
                if let Some(shared) = inner
                    .pods
                    .get_mut(&namespace)
                    .and_then(|nodes| nodes.get_mut(&node_name))
                {
                    shared.refcount = shared.refcount.saturating_sub(1);
                    if shared.refcount == 0 {
                        // Grace window opens; a returning consumer can
                        // still reuse the instance before it expires.
                        shared.last_verified = Some(Utc::now());
                    }
                }
            }
        }
        self.persist(ctx, false).await;
    }

    async fn create_instance(
        &self,
        ctx: &ControllerContext,
        spec: &PodSpec,
        namespace: &str,
        node: &str,
    ) -> Pod {
        let mut pod = Pod::new(1);
        pod.updated_at = Some(Utc::now());
        pod.node_name = node.to_string();
        let Some(container) = spec.containers.first() else {
            pod.last_error = "dependency spec has no containers".to_string();
            return pod;
        };
        let opts = ContainerCreateOptions {
            name: format!("{}.{}.{}", spec.name, namespace, node),
            image: container.image.clone(),
            command: container.command.clone(),
            env: container.env.clone(),
            memory_limit: container.memory_limit,
            cpu_limit: container.cpu_limit,
            node_name: node.to_string(),
        };
        match ctx.cluster.create_container(&opts).await {
            Ok(id) => match ctx.cluster.start_container(&id).await {
                Ok(()) => {
                    pod.container_id = id;
                    pod.running = true;
                }
                Err(err) => {
                    pod.container_id = id;
                    pod.last_error = err.to_string();
                    warn!(name = %self.name, %namespace, %node, %err, "dependency start failed");
                }
            },
            Err(err) => {
                pod.last_error = err.to_string();
                warn!(name = %self.name, %namespace, %node, %err, "dependency create failed");
            }
        }
        pod
    }

    async fn persist(&self, ctx: &ControllerContext, force: bool) {
        let pods = self.inner.read().await.pods.clone();
        if let Err(err) = ctx.store.set(&keys::depends_pods(&self.name), &pods, force).await {
            warn!(name = %self.name, %err, "dependency pods persistence failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::memory_store::MemoryStore;
    use crate::adapters::mock_cluster::MockCluster;
    use crate::domain::models::{ContainerSpec, Node};
    use crate::engine::eagle_view::EagleView;

    fn dep_spec() -> PodSpec {
        PodSpec {
            name: "portal".to_string(),
            namespace: "prod".to_string(),
            containers: vec![ContainerSpec {
                image: "portal:1".to_string(),
                memory_limit: 64_000_000,
                ..ContainerSpec::default()
            }],
            ..PodSpec::default()
        }
    }

    fn activate(ctrl: &Arc<DependsController>, cluster: Arc<MockCluster>, store: Arc<MemoryStore>) {
        ctrl.activate(ControllerContext {
            cluster,
            store,
            eagle_view: Arc::new(EagleView::new()),
            launch_wait: Duration::from_millis(50),
            depends_gc_grace: Duration::from_millis(50),
        });
    }

    fn add_event(node: &str) -> DependencyEvent {
        DependencyEvent::Add {
            name: "portal".to_string(),
            namespace: "prod".to_string(),
            node_name: node.to_string(),
        }
    }

    fn remove_event(node: &str) -> DependencyEvent {
        DependencyEvent::Remove {
            name: "portal".to_string(),
            namespace: "prod".to_string(),
            node_name: node.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_add_creates_one_instance_per_node() {
        let cluster = Arc::new(MockCluster::new(vec![Node {
            name: "node-1".to_string(),
            memory: 1_000_000_000,
            ..Node::default()
        }]));
        let store = Arc::new(MemoryStore::new());
        let ctrl = DependsController::new(dep_spec(), None);
        activate(&ctrl, cluster.clone(), store.clone());

        ctrl.enqueue(DepOp::Dispatch { event: add_event("node-1") }).await;
        ctrl.enqueue(DepOp::Dispatch { event: add_event("node-1") }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let pods = ctrl.inspect().await;
        let shared = &pods["prod"]["node-1"];
        assert_eq!(shared.refcount, 2);
        assert_eq!(cluster.created_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_collects_unreferenced_instance_after_grace() {
        let cluster = Arc::new(MockCluster::new(vec![Node {
            name: "node-1".to_string(),
            memory: 1_000_000_000,
            ..Node::default()
        }]));
        let store = Arc::new(MemoryStore::new());
        let ctrl = DependsController::new(dep_spec(), None);
        // 50ms grace window, per `activate` below.
        activate(&ctrl, cluster.clone(), store.clone());

        ctrl.enqueue(DepOp::Dispatch { event: add_event("node-1") }).await;
        ctrl.enqueue(DepOp::Dispatch { event: remove_event("node-1") }).await;
        // Refresh inside the grace window: the instance survives for a
        // returning consumer.
        ctrl.enqueue(DepOp::Refresh).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cluster.containers().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        ctrl.enqueue(DepOp::Refresh).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(ctrl.inspect().await.is_empty());
        assert!(cluster.containers().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_spec_aborts_when_referenced() {
        let cluster = Arc::new(MockCluster::new(vec![Node {
            name: "node-1".to_string(),
            memory: 1_000_000_000,
            ..Node::default()
        }]));
        let store = Arc::new(MemoryStore::new());
        let ctrl = DependsController::new(dep_spec(), None);
        activate(&ctrl, cluster.clone(), store.clone());

        ctrl.enqueue(DepOp::Dispatch { event: add_event("node-1") }).await;
        ctrl.enqueue(DepOp::RemoveSpec { force: false }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctrl.remove_status(), RemoveStatus::InUse);
        assert_eq!(cluster.containers().await.len(), 1);

        ctrl.reset_removal();
        ctrl.enqueue(DepOp::RemoveSpec { force: true }).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctrl.remove_status(), RemoveStatus::Removed);
        assert!(cluster.containers().await.is_empty());
    }
}
