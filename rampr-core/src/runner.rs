mod checks;
mod config;
mod error;
mod metrics;
mod pool;
mod progress;
mod run;
mod scenario;
mod schedule;
mod thresholds;
mod vu;

pub use checks::{Check, CheckOutcome};
pub use config::{RequestStep, RequestTarget, ScenarioConfig, Stage, Step, metric_names};
pub use error::{Error, Result};
pub use metrics::{
    MetricKind, MetricValues, MetricsCollector, MetricsSnapshot, RequestOutcome, SeriesSummary,
};
pub use pool::{PoolGauges, VirtualUserPool};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use run::{RunSummary, run_scenario};
pub use scenario::ScenarioRunner;
pub use schedule::{StageSchedule, StageSnapshot};
pub use thresholds::{
    ThresholdExpr, ThresholdReason, ThresholdResult, ThresholdSet, ThresholdVerdict,
    evaluate_thresholds, parse_threshold_expr,
};
pub use vu::{CancelSignal, VirtualUser, VuState};
