use std::sync::Arc;
use std::time::Duration;

/// Position within the stage curve at the time of a progress tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage number, for display.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
}

/// Periodic run status handed to the embedding frontend. Values are read
/// from live aggregates and may lag in-flight requests by one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub tick: u64,
    pub elapsed: Duration,
    pub active_vus: u64,
    pub current_target: u64,
    /// `None` once the curve is exhausted and the pool is draining.
    pub stage: Option<StageProgress>,
    pub iterations_total: u64,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    /// Requests completed since the previous tick, per second.
    pub rps_now: f64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;
