use super::metrics::{MetricsSnapshot, MetricValues, SeriesSummary};

/// All pass/fail expressions configured for one metric,
/// e.g. `http_req_duration: ["p(95)<500", "avg<200"]`.
#[derive(Debug, Clone)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    P(u32),
}

#[derive(Debug, Clone)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// Why a threshold got its verdict. `Indeterminate` means the metric had
/// no samples (or the aggregation is undefined for the series); it is
/// reported as a failure, never a silent pass, so operators can tell
/// "broke" apart from "never tested".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdReason {
    Met,
    Breached,
    Indeterminate,
}

impl ThresholdReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Met => "met",
            Self::Breached => "breached",
            Self::Indeterminate => "indeterminate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    pub reason: ThresholdReason,
}

///// The run's exit signal: one result per configured expression, none omitted.
#[derive(Debug, Clone, Default)]
pub struct ThresholdVerdict {
    pub results: Vec<ThresholdResult>,
    pub all_passed: bool,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u32 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(1..=99).contains(&p) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}

/// End-of-run evaluation over a snapshot. Expressions were validated at
/// config time, so a parse failure here is treated as indeterminate rather
/// than aborting the report.
pub fn evaluate_thresholds(thresholds: &[ThresholdSet], snapshot: &MetricsSnapshot) -> ThresholdVerdict {
    let mut results = Vec::new();

    for set in thresholds {
        let series = snapshot.base_series(&set.metric);

        for raw in &set.expressions {
            let (observed, passed, reason) = match parse_threshold_expr(raw) {
                Ok(expr) => {
                    let observed = series.and_then(|s| observed_value(s, &expr.agg));
                    match observed {
                        Some(v) if compare(v, expr.op, expr.value) => {
                            (observed, true, ThresholdReason::Met)
                        }
                        Some(_) => (observed, false, ThresholdReason::Breached),
                        None => (None, false, ThresholdReason::Indeterminate),
                    }
                }
                Err(_) => (None, false, ThresholdReason::Indeterminate),
            };

            results.push(ThresholdResult {
                metric: set.metric.clone(),
                expression: raw.clone(),
                observed,
                passed,
                reason,
            });
        }
    }

    let all_passed = results.iter().all(|r| r.passed);
    ThresholdVerdict {
        results,
        all_passed,
    }
}

fn compare(left: f64, op: ThresholdOp, right: f64) -> bool {
    match op {
        ThresholdOp::Lt => left < right,
        ThresholdOp::Lte => left <= right,
        ThresholdOp::Gt => left > right,
        ThresholdOp::Gte => left >= right,
        ThresholdOp::Eq => left == right,
    }
}

fn observed_value(series: &SeriesSummary, agg: &ThresholdAgg) -> Option<f64> {
    match (&series.values, agg) {
        (MetricValues::Trend { avg, .. }, ThresholdAgg::Avg) => *avg,
        (MetricValues::Trend { min, .. }, ThresholdAgg::Min) => *min,
        (MetricValues::Trend { max, .. }, ThresholdAgg::Max) => *max,
        (MetricValues::Trend { count, .. }, ThresholdAgg::Count) => {
            if *count == 0 {
                None
            } else {
                Some(*count as f64)
            }
        }
        (
            MetricValues::Trend {
                p50, p90, p95, p99, ..
            },
            ThresholdAgg::P(p),
        ) => match *p {
            50 => *p50,
            90 => *p90,
            95 => *p95,
            99 => *p99,
            // Only the common percentiles are tracked.
            _ => None,
        },

        (MetricValues::Counter { value }, ThresholdAgg::Count) => Some(*value),
        (MetricValues::Counter { value }, ThresholdAgg::Avg) => Some(*value),
        (MetricValues::Gauge { value }, ThresholdAgg::Avg) => Some(*value),
        (MetricValues::Gauge { value }, ThresholdAgg::Min) => Some(*value),
        (MetricValues::Gauge { value }, ThresholdAgg::Max) => Some(*value),

        (MetricValues::Rate { rate, .. }, ThresholdAgg::Rate) => *rate,
        (MetricValues::Rate { total, .. }, ThresholdAgg::Count) => {
            if *total == 0 {
                None
            } else {
                Some(*total as f64)
            }
        }

        // Non-sensical combinations.
        (_, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::metrics::{MetricsCollector, RequestOutcome};
    use std::time::Duration;

    fn set(metric: &str, exprs: &[&str]) -> ThresholdSet {
        ThresholdSet {
            metric: metric.to_string(),
            expressions: exprs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = parse_threshold_expr("  avg  <=  123  ").unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(expr.agg, ThresholdAgg::Avg));
        assert!(matches!(expr.op, ThresholdOp::Lte));
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_reads_percentiles() {
        let expr = parse_threshold_expr("p(95)<500").unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(expr.agg, ThresholdAgg::P(95)));
        assert!(matches!(expr.op, ThresholdOp::Lt));
        assert_eq!(expr.value, 500.0);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        let err = match parse_threshold_expr("p(100)<1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("out of range"));
    }

    #[test]
    fn parse_threshold_expr_rejects_missing_operator() {
        assert!(parse_threshold_expr("avg 500").is_err());
    }

    #[test]
    fn zero_sample_threshold_is_an_indeterminate_failure() {
        let collector = MetricsCollector::default();
        let snapshot = collector.snapshot();

        let verdict = evaluate_thresholds(
            &[
                set("http_req_duration", &["p(95)<500"]),
                set("http_req_failed", &["rate<0.05"]),
            ],
            &snapshot,
        );

        assert!(!verdict.all_passed);
        assert_eq!(verdict.results.len(), 2);
        for r in &verdict.results {
            assert!(!r.passed);
            assert_eq!(r.reason, ThresholdReason::Indeterminate);
            assert_eq!(r.observed, None);
        }
    }

    #[test]
    fn p95_threshold_tolerates_a_top_five_percent_outlier() {
        let collector = MetricsCollector::default();
        for _ in 0..19 {
            collector.ingest(&RequestOutcome {
                endpoint: "/".to_string(),
                status: 200,
                latency: Duration::from_millis(110),
                checks_passed: true,
                error: None,
                timestamp: Duration::ZERO,
            });
        }
        collector.ingest(&RequestOutcome {
            endpoint: "/".to_string(),
            status: 200,
            latency: Duration::from_millis(600),
            checks_passed: true,
            error: None,
            timestamp: Duration::ZERO,
        });

        let verdict = evaluate_thresholds(
            &[set("http_req_duration", &["p(95)<500"])],
            &collector.snapshot(),
        );

        assert!(verdict.all_passed);
        assert_eq!(verdict.results[0].reason, ThresholdReason::Met);
        let observed = verdict.results[0]
            .observed
            .unwrap_or_else(|| panic!("missing observed"));
        assert!(observed < 500.0, "observed = {observed}");
    }

    #[test]
    fn breached_threshold_reports_the_observed_value() {
        let collector = MetricsCollector::default();
        collector.ingest(&RequestOutcome {
            endpoint: "/".to_string(),
            status: 500,
            latency: Duration::from_millis(10),
            checks_passed: false,
            error: None,
            timestamp: Duration::ZERO,
        });

        let verdict = evaluate_thresholds(
            &[set("http_req_failed", &["rate<0.05"])],
            &collector.snapshot(),
        );

        assert!(!verdict.all_passed);
        let r = &verdict.results[0];
        assert_eq!(r.reason, ThresholdReason::Breached);
        assert_eq!(r.observed, Some(1.0));
    }

    #[test]
    fn every_expression_gets_a_result_row() {
        let collector = MetricsCollector::default();
        // A clean request feeds the error rate; the iteration feeds the
        // counter series.
        collector.ingest(&RequestOutcome {
            endpoint: "/".to_string(),
            status: 200,
            latency: Duration::from_millis(10),
            checks_passed: true,
            error: None,
            timestamp: Duration::ZERO,
        });
        collector.record_iteration(Duration::from_millis(100));

        let verdict = evaluate_thresholds(
            &[
                set("iterations", &["count>=1", "count>100"]),
                set("errors", &["rate<0.05"]),
            ],
            &collector.snapshot(),
        );

        assert_eq!(verdict.results.len(), 3);
        assert!(!verdict.all_passed);
        assert_eq!(verdict.results[0].reason, ThresholdReason::Met);
        assert_eq!(verdict.results[1].reason, ThresholdReason::Breached);
        assert_eq!(verdict.results[2].reason, ThresholdReason::Met);
    }

    #[test]
    fn undefined_aggregation_for_series_kind_is_indeterminate() {
        let collector = MetricsCollector::default();
        collector.ingest(&RequestOutcome {
            endpoint: "/".to_string(),
            status: 200,
            latency: Duration::from_millis(10),
            checks_passed: true,
            error: None,
            timestamp: Duration::ZERO,
        });

        // `rate` over a counter series makes no sense.
        let verdict =
            evaluate_thresholds(&[set("http_reqs", &["rate<0.5"])], &collector.snapshot());
        assert_eq!(verdict.results[0].reason, ThresholdReason::Indeterminate);
    }
}
