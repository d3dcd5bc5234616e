//! Cluster monitor.
//!
//! Consumes the runtime event stream and translates events into
//! reconciliation operations. Any stream error tears the subscription
//! down, counts against cluster health, and restarts after a short pause.
//! Mass node loss inside the reset window trips the safety brake and
//! stops the engine outright.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::domain::models::{
    parse_container_name, parse_name_instance, EventKind, HealthState, PgOpState, RuntimeEvent,
};

use super::core::OrcEngine;
use super::history::{self, StatusMessage};
use super::pod_group::PgOp;

pub(crate) async fn run_cluster_monitor(engine: Arc<OrcEngine>, mut stop: watch::Receiver<bool>) {
    let mut down_count: u32 = 0;
    let mut down_since = Instant::now();
    loop {
        let (monitor_id, mut events) = engine.cluster.monitor_events("").await;
        debug!("cluster event subscription open");
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    engine.cluster.stop_monitor(monitor_id).await;
                    return;
                }
                item = events.recv() => match item {
                    None => {
                        engine.cluster_request_failed().await;
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(%err, "cluster event stream error, restarting monitor");
                        engine.cluster_request_failed().await;
                        break;
                    }
                    Some(Ok(event)) => {
                        engine.cluster_request_succeeded();
                        if event.from.starts_with("swarm") {
                            if event.status == "engine_disconnect" {
                                let now = Instant::now();
                                // The window opens at the first recorded
                                // downtime; beyond it the count restarts.
                                if now > down_since + engine.timings.down_node_reset {
                                    down_count = 1;
                                    down_since = now;
                                } else {
                                    down_count += 1;
                                }
                                engine.on_cluster_node_lost(&event.node_name, down_count);
                            }
                        } else {
                            dispatch_runtime_event(&engine, &event).await;
                        }
                    }
                }
            }
        }
        engine.cluster.stop_monitor(monitor_id).await;
        tokio::time::sleep(engine.timings.monitor_restart_delay).await;
    }
}

async fn dispatch_runtime_event(engine: &Arc<OrcEngine>, event: &RuntimeEvent) {
    if event.kind != EventKind::Container {
        return;
    }
    if event.status.starts_with("health_status") {
        handle_health_event(engine, event).await;
        return;
    }
    match event.status.as_str() {
        "start" | "stop" => save_status_history(engine, event).await,
        // OOM, kill, and stop all end in a die event, so die alone
        // triggers the per-instance refresh.
        "die" => handle_die_event(engine, event).await,
        _ => {}
    }
}

async fn handle_die_event(engine: &Arc<OrcEngine>, event: &RuntimeEvent) {
    let Some(name) = event.container_name() else {
        return;
    };
    let Some((pg_name, _, instance, _)) = parse_container_name(name) else {
        debug!(%name, "die event for a container that is not ours");
        return;
    };
    let Some(ctrl) = engine.pg_ctrl(&pg_name).await else {
        warn!(%pg_name, "die event for unknown pod group");
        return;
    };
    if ctrl.op_state() != PgOpState::Upgrading {
        warn!(%name, "container died, refreshing its instance");
        ctrl.enqueue(PgOp::RefreshInstance { instance }).await;
    }
}

async fn handle_health_event(engine: &Arc<OrcEngine>, event: &RuntimeEvent) {
    let health = match event.status.as_str() {
        "health_status: starting" => HealthState::Starting,
        "health_status: healthy" => HealthState::Healthy,
        "health_status: unhealthy" => HealthState::Unhealthy,
        _ => HealthState::None,
    };
    let detail = match engine.cluster.inspect_container(&event.id).await {
        Ok(detail) => detail,
        Err(err) => {
            error!(id = %event.id, %err, "inspect failed on health event");
            return;
        }
    };
    let container_name = detail.name.trim_start_matches('/');
    let Some((pod_name, instance)) = health_event_target(container_name) else {
        debug!(name = %container_name, "health event for a container that is not ours");
        return;
    };
    let Some(ctrl) = engine.pg_ctrl(&pod_name).await else {
        return;
    };
    ctrl.enqueue(PgOp::UpdateHealth { instance, health }).await;
}

/// Resolve an inspected container name to `(pod_name, instance)`.
///
/// Health events are correlated in either wire form: the alternate
/// `<podname>-<instance>` shape is tried first (health-reporting runtime
/// frontends use it), then the canonical dotted name the engine assigns
/// at create time. The dash attempt cannot claim a dotted name: it
/// requires everything after the last dash to be a bare instance number,
/// and a dotted name's tail is `<instance>.<suffix>`.
fn health_event_target(container_name: &str) -> Option<(String, usize)> {
    parse_name_instance(container_name)
        .or_else(|| parse_container_name(container_name).map(|(pg, _, instance, _)| (pg, instance)))
}

async fn save_status_history(engine: &Arc<OrcEngine>, event: &RuntimeEvent) {
    let Some(name) = event.container_name() else {
        return;
    };
    let Some((pg_name, _, instance, _)) = parse_container_name(name) else {
        return;
    };
    let message = StatusMessage {
        status: event.status.clone(),
        node_name: event.node_name.clone(),
        container_id: event.id.clone(),
        timestamp: Utc::now(),
    };
    if let Err(err) = history::save_pod_status(engine.store.as_ref(), &pg_name, instance, message).await
    {
        warn!(%pg_name, instance, %err, "status history persistence failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::render_name_instance;

    #[test]
    fn test_health_target_resolves_alternate_dash_form() {
        let name = render_name_instance("web", 1);
        assert_eq!(health_event_target(&name), Some(("web".to_string(), 1)));
        // Pod names may themselves carry dashes.
        let name = render_name_instance("my-app", 3);
        assert_eq!(health_event_target(&name), Some(("my-app".to_string(), 3)));
    }

    #[test]
    fn test_health_target_resolves_canonical_dotted_form() {
        assert_eq!(
            health_event_target("web.prod.2.a1b2c3d4"),
            Some(("web".to_string(), 2))
        );
        // A dashed pod-group name never misparses as the dash form.
        assert_eq!(
            health_event_target("my-app.prod.1.a1b2c3d4"),
            Some(("my-app".to_string(), 1))
        );
    }

    #[test]
    fn test_health_target_rejects_foreign_names() {
        assert_eq!(health_event_target("some-sidecar"), None);
        assert_eq!(health_event_target(""), None);
    }
}
