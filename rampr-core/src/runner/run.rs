use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::http::Transport;

use super::config::ScenarioConfig;
use super::error::Result;
use super::metrics::{MetricsCollector, MetricsSnapshot};
use super::pool::{PoolGauges, VirtualUserPool};
use super::progress::{ProgressFn, ProgressUpdate, StageProgress};
use super::schedule::StageSchedule;
use super::thresholds::{ThresholdVerdict, evaluate_thresholds};
use super::vu::CancelSignal;

/// Everything the frontend needs to render a final report and decide the
/// process exit code.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub scenario: String,
    pub elapsed: Duration,
    pub iterations_total: u64,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub checks_failed_total: u64,
    pub vus_spawned: u64,
    pub vus_retired: u64,
    pub cancelled: bool,
    pub metrics: MetricsSnapshot,
    pub verdict: ThresholdVerdict,
}

/// Runs the scenario to completion: validates the config, drives the
/// virtual-user pool over the stage curve, then snapshots metrics and
/// evaluates thresholds over the whole run.
///
/// Cancellation stops the ramp early but still produces a summary; the
/// thresholds are evaluated over whatever was collected.
pub async fn run_scenario<T: Transport>(
    config: ScenarioConfig,
    transport: Arc<T>,
    cancel: Arc<CancelSignal>,
    progress: Option<ProgressFn>,
) -> Result<RunSummary> {
    config.validate()?;
    let config = Arc::new(config);

    let schedule = Arc::new(StageSchedule::new(config.start_vus, config.stages.clone()));
    let collector = Arc::new(MetricsCollector::default());
    let started = Instant::now();

    tracing::info!(
        scenario = %config.name,
        stages = config.stages.len(),
        max_vus = config.max_vus(),
        total = ?schedule.total_duration(),
        "starting run"
    );

    let pool = VirtualUserPool::new(
        Arc::clone(&config),
        Arc::clone(&schedule),
        transport,
        Arc::clone(&collector),
        Arc::clone(&cancel),
        started,
    );
    let gauges = pool.gauges();

    let reporter = progress.map(|emit| {
        tokio::spawn(report_progress(
            emit,
            Arc::clone(&schedule),
            Arc::clone(&collector),
            Arc::clone(&gauges),
            started,
        ))
    });

    let outcome = pool.run().await;

    if let Some(handle) = reporter {
        handle.abort();
        let _ = handle.await;
    }
    outcome?;

    let elapsed = started.elapsed();
    let metrics = collector.snapshot();
    let verdict = evaluate_thresholds(&config.thresholds, &metrics);

    tracing::info!(
        scenario = %config.name,
        elapsed = ?elapsed,
        iterations = collector.iterations_total(),
        requests = collector.requests_total(),
        all_passed = verdict.all_passed,
        "run finished"
    );

    Ok(RunSummary {
        scenario: config.name.clone(),
        elapsed,
        iterations_total: collector.iterations_total(),
        requests_total: collector.requests_total(),
        failed_requests_total: collector.failed_requests_total(),
        checks_failed_total: collector.checks_failed_total(),
        vus_spawned: gauges.spawned_total(),
        vus_retired: gauges.retired_total(),
        cancelled: cancel.is_cancelled(),
        metrics,
        verdict,
    })
}

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

async fn report_progress(
    emit: ProgressFn,
    schedule: Arc<StageSchedule>,
    collector: Arc<MetricsCollector>,
    gauges: Arc<PoolGauges>,
    started: Instant,
) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so deltas cover a full
    // interval.
    interval.tick().await;

    let mut tick = 0u64;
    let mut last_requests = 0u64;
    let mut last_at = started;

    loop {
        interval.tick().await;
        tick += 1;

        let now = Instant::now();
        let elapsed = started.elapsed();
        let requests_total = collector.requests_total();

        let window = now.saturating_duration_since(last_at).as_secs_f64();
        let rps_now = if window > 0.0 {
            (requests_total - last_requests) as f64 / window
        } else {
            0.0
        };
        last_requests = requests_total;
        last_at = now;

        let stage = if schedule.is_done(elapsed) {
            None
        } else {
            schedule.stage_snapshot_at(elapsed).map(|s| StageProgress {
                stage: s.index + 1,
                stages: s.count,
                stage_elapsed: s.stage_elapsed,
                stage_remaining: s.stage_remaining,
                start_target: s.start_target,
                end_target: s.end_target,
            })
        };

        emit(ProgressUpdate {
            tick,
            elapsed,
            active_vus: gauges.active(),
            current_target: schedule.target_at(elapsed),
            stage,
            iterations_total: collector.iterations_total(),
            requests_total,
            failed_requests_total: collector.failed_requests_total(),
            rps_now,
        });
    }
}
