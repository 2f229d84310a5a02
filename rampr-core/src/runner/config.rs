use std::time::Duration;

use super::checks::Check;
use super::error::{Error, Result};
use super::thresholds::{ThresholdSet, parse_threshold_expr};

/// One time window of the concurrency curve: ramp (or hold) towards
/// `target` virtual users over `duration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Where a request step points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// A fixed path relative to the scenario base URL.
    Path(String),
    /// The endpoint drawn for this iteration from `ScenarioConfig::endpoints`.
    RandomEndpoint,
}

#[derive(Debug, Clone)]
pub struct RequestStep {
    /// Label used for the per-endpoint latency series; defaults to the path.
    pub name: String,
    pub method: http::Method,
    pub target: RequestTarget,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone)]
pub enum Step {
    Request(RequestStep),
    /// Think time between steps.
    Sleep(Duration),
}

/// Metric names the engine emits; thresholds may only reference these.
pub mod metric_names {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const CHECKS: &str = "checks";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ERRORS: &str = "errors";
    pub const VUS: &str = "vus";

    pub const ALL: &[&str] = &[
        HTTP_REQS,
        HTTP_REQ_DURATION,
        HTTP_REQ_FAILED,
        CHECKS,
        ITERATIONS,
        ITERATION_DURATION,
        ERRORS,
        VUS,
    ];
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub name: String,

    /// Root URL of the target service, resolved once at run start
    /// (scenario file, overridden by environment/CLI).
    pub base_url: String,

    /// VU count the first stage ramps from.
    pub start_vus: u64,
    pub stages: Vec<Stage>,

    /// Endpoint paths eligible for `RequestTarget::RandomEndpoint`.
    pub endpoints: Vec<String>,

    pub steps: Vec<Step>,
    pub thresholds: Vec<ThresholdSet>,

    /// Applied uniformly to every request.
    pub request_timeout: Duration,

    /// Pool reconciliation tick.
    pub reconcile_interval: Duration,

    /// Seed for per-VU random sources; equal seeds give equal endpoint picks.
    pub seed: u64,
}

impl ScenarioConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_millis(100);

    /// Rejects configurations the run must never start with. Everything that
    /// can fail later (requests, checks) is absorbed into metrics instead.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidStages);
        }
        let total = self
            .stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        if total.is_zero() {
            return Err(Error::InvalidStages);
        }

        if self.steps.is_empty() {
            return Err(Error::NoSteps);
        }
        if !self
            .steps
            .iter()
            .any(|s| matches!(s, Step::Request(_)))
        {
            return Err(Error::NoRequestStep);
        }

        let parsed = url::Url::parse(&self.base_url)
            .map_err(|_| Error::InvalidBaseUrl(self.base_url.clone()))?;
        if parsed.scheme() != "http" || parsed.host_str().is_none() {
            return Err(Error::InvalidBaseUrl(self.base_url.clone()));
        }

        let uses_random = self.steps.iter().any(|s| {
            matches!(
                s,
                Step::Request(RequestStep {
                    target: RequestTarget::RandomEndpoint,
                    ..
                })
            )
        });
        if uses_random && self.endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        if self.request_timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }
        if self.reconcile_interval.is_zero() {
            return Err(Error::InvalidReconcileInterval);
        }

        for set in &self.thresholds {
            if !metric_names::ALL.contains(&set.metric.as_str()) {
                return Err(Error::UnknownThresholdMetric(set.metric.clone()));
            }
            for expr in &set.expressions {
                parse_threshold_expr(expr).map_err(|reason| Error::InvalidThreshold {
                    metric: set.metric.clone(),
                    reason,
                })?;
            }
        }

        Ok(())
    }

    /// Highest concurrency the stage curve can ask for.
    pub fn max_vus(&self) -> u64 {
        let max_stage = self.stages.iter().map(|s| s.target).max().unwrap_or(0);
        max_stage.max(self.start_vus)
    }

    /// Number of request steps per iteration; every completed iteration
    /// contributes exactly this many outcomes.
    pub fn request_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Request(_)))
            .count()
    }
}
