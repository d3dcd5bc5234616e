//! The single-consumer operation worker.
//!
//! Consumes the engine queue in arrival order, fires the main refresh
//! tick (spacing pod-group refreshes across the first half-interval and
//! dependency refreshes across the second), runs the slow ports tick, and
//! drains the queue on shutdown. Deferred refreshes sit in one due-time
//! min-heap instead of a sleeper task per controller.

use std::cmp::Ordering as CmpOrdering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::core::OrcEngine;
use super::depends::{DepOp, DependsController};
use super::pod_group::{PgOp, PodGroupController};
use super::ports_registry;

enum RefreshTarget {
    PodGroup(Arc<PodGroupController>),
    Depends(Arc<DependsController>),
}

struct Deferred {
    due: Instant,
    seq: u64,
    target: RefreshTarget,
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Deferred {}

impl PartialOrd for Deferred {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deferred {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Evenly spaced offsets across the first half of the interval:
/// `index * (half_interval / count)`.
pub(crate) fn refresh_offsets(count: usize, interval: Duration) -> Vec<Duration> {
    if count == 0 {
        return Vec::new();
    }
    let step = interval / 2 / (count as u32);
    (0..count as u32).map(|index| step * index).collect()
}

pub(crate) async fn run_operation_worker(engine: Arc<OrcEngine>, mut stop: watch::Receiver<bool>) {
    let mut rx = engine.ops_rx.clone().lock_owned().await;
    let period = engine.timings.refresh_interval;
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ports_period = engine.timings.ports_interval;
    let mut ports_tick = interval_at(Instant::now() + ports_period, ports_period);
    ports_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut deferred: BinaryHeap<Reverse<Deferred>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let next_due = deferred.peek().map(|Reverse(entry)| entry.due);
        tokio::select! {
            op = rx.recv() => match op {
                Some(op) => op.dispatch().await,
                None => return,
            },
            _ = tick.tick() => {
                schedule_refresh_wave(&engine, &mut deferred, &mut seq).await;
            }
            _ = ports_tick.tick() => {
                let ctrls: Vec<Arc<PodGroupController>> = {
                    let regs = engine.registries.read().await;
                    regs.pg_ctrls.values().cloned().collect()
                };
                ports_registry::refresh_ports(engine.store.as_ref(), &ctrls).await;
            }
            _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                while deferred.peek().is_some_and(|Reverse(entry)| entry.due <= now) {
                    let Some(Reverse(entry)) = deferred.pop() else { break };
                    fire_refresh(entry.target).await;
                }
            }
            _ = stop.changed() => {
                debug!("stop signalled, draining remaining operations");
                while let Ok(op) = rx.try_recv() {
                    op.dispatch().await;
                }
                return;
            }
        }
    }
}

async fn schedule_refresh_wave(
    engine: &Arc<OrcEngine>,
    deferred: &mut BinaryHeap<Reverse<Deferred>>,
    seq: &mut u64,
) {
    let (pg_ctrls, dep_ctrls) = {
        let regs = engine.registries.read().await;
        (
            regs.pg_ctrls.values().cloned().collect::<Vec<_>>(),
            regs.depends_ctrls.values().cloned().collect::<Vec<_>>(),
        )
    };
    let refreshable: Vec<Arc<PodGroupController>> = pg_ctrls
        .into_iter()
        .filter(|ctrl| ctrl.refreshable())
        .collect();
    let now = Instant::now();
    let interval = engine.timings.refresh_interval;
    for (ctrl, offset) in refreshable
        .iter()
        .zip(refresh_offsets(refreshable.len(), interval))
    {
        info!(name = %ctrl.name(), delay_secs = offset.as_secs(), "scheduling pod group refresh");
        deferred.push(Reverse(Deferred {
            due: now + offset,
            seq: *seq,
            target: RefreshTarget::PodGroup(ctrl.clone()),
        }));
        *seq += 1;
    }
    // Dependency controllers take the second half of the interval.
    let half = interval / 2;
    for (ctrl, offset) in dep_ctrls
        .iter()
        .zip(refresh_offsets(dep_ctrls.len(), interval))
    {
        info!(name = %ctrl.name(), delay_secs = (half + offset).as_secs(), "scheduling dependency refresh");
        deferred.push(Reverse(Deferred {
            due: now + half + offset,
            seq: *seq,
            target: RefreshTarget::Depends(ctrl.clone()),
        }));
        *seq += 1;
    }
}

async fn fire_refresh(target: RefreshTarget) {
    match target {
        RefreshTarget::PodGroup(ctrl) => ctrl.enqueue(PgOp::Refresh { force: false }).await,
        RefreshTarget::Depends(ctrl) => ctrl.enqueue(DepOp::Refresh).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_are_spaced_by_half_interval_over_count() {
        let offsets = refresh_offsets(4, Duration::from_secs(60));
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], Duration::ZERO);
        let step = Duration::from_secs(30) / 4;
        for (index, offset) in offsets.iter().enumerate() {
            assert_eq!(*offset, step * index as u32);
        }
        // The whole wave fits inside the first half-interval.
        assert!(*offsets.last().unwrap() < Duration::from_secs(30));
    }

    #[test]
    fn test_offsets_empty_for_no_controllers() {
        assert!(refresh_offsets(0, Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_deferred_orders_by_due_time() {
        let now = Instant::now();
        let mut heap: BinaryHeap<Reverse<Deferred>> = BinaryHeap::new();
        for (seq, offset_ms) in [(0u64, 300u64), (1, 100), (2, 200)] {
            heap.push(Reverse(Deferred {
                due: now + Duration::from_millis(offset_ms),
                seq,
                target: RefreshTarget::Depends(crate::engine::depends::DependsController::new(
                    crate::domain::models::PodSpec::default(),
                    None,
                )),
            }));
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(d)| d.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }
}
