use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::http::Transport;

use super::config::ScenarioConfig;
use super::error::Result;
use super::metrics::MetricsCollector;
use super::scenario::ScenarioRunner;
use super::schedule::StageSchedule;
use super::vu::{CancelSignal, VirtualUser};

/// Live pool counters, readable from outside the reconciler task.
#[derive(Debug, Default)]
pub struct PoolGauges {
    active: AtomicU64,
    spawned_total: AtomicU64,
    retired_total: AtomicU64,
}

impl PoolGauges {
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn spawned_total(&self) -> u64 {
        self.spawned_total.load(Ordering::Acquire)
    }

    pub fn retired_total(&self) -> u64 {
        self.retired_total.load(Ordering::Acquire)
    }
}

struct Member {
    vu: Arc<VirtualUser>,
    handle: JoinHandle<()>,
}

/// Owns the virtual users and reconciles their count against the stage
/// curve once per tick: spawn up to the target, retire down to it. Retired
/// users finish their current iteration before exiting, so the live count
/// may briefly sit above the target between ticks.
pub struct VirtualUserPool<T> {
    config: Arc<ScenarioConfig>,
    schedule: Arc<StageSchedule>,
    transport: Arc<T>,
    collector: Arc<MetricsCollector>,
    cancel: Arc<CancelSignal>,
    gauges: Arc<PoolGauges>,
    started: Instant,
    members: Vec<Member>,
    next_vu_id: u64,
}

impl<T: Transport> VirtualUserPool<T> {
    pub fn new(
        config: Arc<ScenarioConfig>,
        schedule: Arc<StageSchedule>,
        transport: Arc<T>,
        collector: Arc<MetricsCollector>,
        cancel: Arc<CancelSignal>,
        started: Instant,
    ) -> Self {
        Self {
            config,
            schedule,
            transport,
            collector,
            cancel,
            gauges: Arc::new(PoolGauges::default()),
            started,
            members: Vec::new(),
            next_vu_id: 0,
        }
    }

    pub fn gauges(&self) -> Arc<PoolGauges> {
        Arc::clone(&self.gauges)
    }

    /// Runs the reconciliation loop until the stage curve is exhausted or
    /// the run is cancelled, then drains every remaining user.
    pub async fn run(mut self) -> Result<()> {
        let mut tick = tokio::time::interval(self.config.reconcile_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = self.cancel.cancelled() => {
                    tracing::info!("run cancelled, draining virtual users");
                    break;
                }
            }

            let elapsed = self.started.elapsed();
            if self.schedule.is_done(elapsed) {
                break;
            }

            self.reconcile(self.schedule.target_at(elapsed));
        }

        self.drain().await
    }

    fn reconcile(&mut self, target: u64) {
        // Reap users whose tasks already exited; they no longer count
        // towards the pool either way.
        self.members.retain(|m| !m.handle.is_finished());

        let active = self
            .members
            .iter()
            .filter(|m| !m.vu.is_retiring())
            .count() as u64;

        if target > active {
            for _ in 0..(target - active) {
                self.spawn_user();
            }
        } else if target < active {
            self.retire_users(active - target);
        }

        let active = self
            .members
            .iter()
            .filter(|m| !m.vu.is_retiring())
            .count() as u64;
        self.gauges.active.store(active, Ordering::Release);
        self.collector.set_active_vus(active);
    }

    fn spawn_user(&mut self) {
        self.next_vu_id += 1;
        let vu = Arc::new(VirtualUser::new(self.next_vu_id));
        tracing::debug!(vu = vu.id(), "spawning virtual user");

        let runner = ScenarioRunner::new(
            Arc::clone(&vu),
            Arc::clone(&self.config),
            Arc::clone(&self.transport),
            Arc::clone(&self.collector),
            Arc::clone(&self.cancel),
            self.started,
        );
        let handle = tokio::spawn(runner.run());

        self.members.push(Member { vu, handle });
        self.gauges.spawned_total.fetch_add(1, Ordering::AcqRel);
    }

    /// Oldest users first; members is in spawn order.
    fn retire_users(&mut self, count: u64) {
        let mut remaining = count;
        for member in &self.members {
            if remaining == 0 {
                break;
            }
            if member.vu.is_retiring() {
                continue;
            }
            tracing::debug!(vu = member.vu.id(), "retiring virtual user");
            member.vu.retire();
            self.gauges.retired_total.fetch_add(1, Ordering::AcqRel);
            remaining -= 1;
        }
    }

    async fn drain(mut self) -> Result<()> {
        for member in &self.members {
            if !member.vu.is_retiring() {
                member.vu.retire();
                self.gauges.retired_total.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.gauges.active.store(0, Ordering::Release);
        self.collector.set_active_vus(0);

        let members = std::mem::take(&mut self.members);
        tracing::debug!(draining = members.len(), "waiting for virtual users");
        for member in members {
            member.handle.await?;
        }
        Ok(())
    }
}
