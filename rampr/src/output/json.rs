use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use rampr_core::runner::{
    MetricValues, ProgressFn, ProgressUpdate, RunSummary, ScenarioConfig, SeriesSummary,
};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _scenario_path: &Path, _config: &ScenarioConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let line = build_summary_line(summary);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: u64,
    pub active_vus: u64,
    pub current_target: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<u64>,

    pub iterations_total: u64,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub requests_per_sec: f64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs(),
        active_vus: u.active_vus,
        current_target: u.current_target,
        stage: u.stage.as_ref().map(|s| s.stage as u64),
        stages: u.stage.as_ref().map(|s| s.stages as u64),
        iterations_total: u.iterations_total,
        requests_total: u.requests_total,
        failed_requests_total: u.failed_requests_total,
        requests_per_sec: u.rps_now,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenario: String,
    pub cancelled: bool,
    pub elapsed_secs: f64,

    pub iterations_total: u64,
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub checks_failed_total: u64,
    pub vus_spawned: u64,
    pub vus_retired: u64,

    pub metrics: Vec<JsonSeries>,
    pub thresholds: Vec<JsonThresholdResult>,
    pub all_passed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSeries {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<(String, String)>,
    #[serde(flatten)]
    pub values: JsonSeriesValues,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum JsonSeriesValues {
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        p50: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
    Counter {
        value: f64,
    },
    Gauge {
        value: f64,
    },
    Rate {
        total: u64,
        trues: u64,
        rate: Option<f64>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    pub reason: &'static str,
}

fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        scenario: summary.scenario.clone(),
        cancelled: summary.cancelled,
        elapsed_secs: summary.elapsed.as_secs_f64(),
        iterations_total: summary.iterations_total,
        requests_total: summary.requests_total,
        failed_requests_total: summary.failed_requests_total,
        checks_failed_total: summary.checks_failed_total,
        vus_spawned: summary.vus_spawned,
        vus_retired: summary.vus_retired,
        metrics: summary.metrics.series.iter().map(json_series).collect(),
        thresholds: summary
            .verdict
            .results
            .iter()
            .map(|r| JsonThresholdResult {
                metric: r.metric.clone(),
                expression: r.expression.clone(),
                observed: r.observed,
                passed: r.passed,
                reason: r.reason.as_str(),
            })
            .collect(),
        all_passed: summary.verdict.all_passed,
    }
}

fn json_series(series: &SeriesSummary) -> JsonSeries {
    let values = match &series.values {
        MetricValues::Trend {
            count,
            min,
            max,
            avg,
            p50,
            p90,
            p95,
            p99,
        } => JsonSeriesValues::Trend {
            count: *count,
            min: *min,
            max: *max,
            avg: *avg,
            p50: *p50,
            p90: *p90,
            p95: *p95,
            p99: *p99,
        },
        MetricValues::Counter { value } => JsonSeriesValues::Counter { value: *value },
        MetricValues::Gauge { value } => JsonSeriesValues::Gauge { value: *value },
        MetricValues::Rate { total, trues, rate } => JsonSeriesValues::Rate {
            total: *total,
            trues: *trues,
            rate: *rate,
        },
    };

    JsonSeries {
        name: series.name.clone(),
        tags: series.tags.clone(),
        values,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_core::runner::{MetricsSnapshot, ThresholdVerdict};
    use serde_json::Value;
    use std::time::Duration;

    #[test]
    fn progress_line_has_kind() {
        let line = JsonProgressLine {
            kind: "progress",
            tick: 1,
            elapsed_secs: 1,
            active_vus: 2,
            current_target: 3,
            stage: Some(1),
            stages: Some(3),
            iterations_total: 4,
            requests_total: 5,
            failed_requests_total: 0,
            requests_per_sec: 6.0,
        };

        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("stage").and_then(Value::as_u64), Some(1));
    }

    #[test]
    fn summary_line_serializes_series_and_verdict() {
        let summary = RunSummary {
            scenario: "s1".to_string(),
            elapsed: Duration::from_secs(10),
            iterations_total: 5,
            requests_total: 10,
            failed_requests_total: 2,
            checks_failed_total: 1,
            vus_spawned: 3,
            vus_retired: 3,
            cancelled: false,
            metrics: MetricsSnapshot {
                series: vec![SeriesSummary {
                    name: "http_reqs".to_string(),
                    kind: rampr_core::runner::MetricKind::Counter,
                    tags: Vec::new(),
                    values: MetricValues::Counter { value: 10.0 },
                }],
            },
            verdict: ThresholdVerdict {
                results: Vec::new(),
                all_passed: true,
            },
        };

        let line = build_summary_line(&summary);
        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };

        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(
            v.pointer("/metrics/0/name").and_then(Value::as_str),
            Some("http_reqs")
        );
        assert_eq!(
            v.pointer("/metrics/0/type").and_then(Value::as_str),
            Some("counter")
        );
        assert_eq!(v.get("all_passed").and_then(Value::as_bool), Some(true));
    }
}
