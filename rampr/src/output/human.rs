use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use rampr_core::runner::{
    MetricValues, ProgressFn, RunSummary, ScenarioConfig, ThresholdReason, metric_names,
};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            bar: Arc::new(Mutex::new(None)),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, scenario_path: &Path, config: &ScenarioConfig) {
        println!("scenario: {} ({})", config.name, scenario_path.display());
        println!("target: {}", config.base_url);
        let total = config
            .stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        println!(
            "stages: {} (total {}, peak {} vus)",
            config.stages.len(),
            format_duration(total),
            config.max_vus()
        );
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let bar = self.bar.clone();

        Some(Arc::new(move |u| {
            let mut slot = bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let pb = slot.get_or_insert_with(|| {
                let pb = ProgressBar::new(0);
                pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
                pb.set_style(bar_style());
                pb
            });

            let stage_part = match &u.stage {
                Some(s) => format!("stage={}/{} ", s.stage, s.stages),
                None => "draining ".to_string(),
            };
            pb.set_message(format!(
                "{stage_part}target={} vus={} rps={:.0} reqs={} fails={}",
                u.current_target, u.active_vus, u.rps_now, u.requests_total, u.failed_requests_total
            ));

            if let Some(s) = &u.stage {
                let stage_total = s.stage_elapsed.saturating_add(s.stage_remaining);
                let done: Duration = u.elapsed.saturating_sub(s.stage_elapsed);
                let total = done.saturating_add(stage_total);
                // Length grows as later stages are entered; good enough for a
                // single moving bar.
                pb.set_length(total.as_millis().max(1) as u64);
                pb.set_position(u.elapsed.as_millis() as u64);
            } else {
                pb.tick();
            }
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        {
            let mut slot = self
                .bar
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }

        print!("{}", render(summary));
        Ok(())
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("[ {bar:20.cyan/blue} ] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    push_line(&mut out, format!("scenario: {}", summary.scenario));
    if summary.cancelled {
        push_line(&mut out, "run was interrupted".to_string());
    }
    push_line(
        &mut out,
        format!(
            "elapsed: {}  iterations: {}  vus: spawned={} retired={}",
            format_duration(summary.elapsed),
            summary.iterations_total,
            summary.vus_spawned,
            summary.vus_retired
        ),
    );
    push_line(&mut out, String::new());

    let elapsed_s = summary.elapsed.as_secs_f64().max(1e-9);
    push_metric(
        &mut out,
        metric_names::HTTP_REQS,
        format!(
            "{} ({:.1}/s)",
            summary.requests_total,
            summary.requests_total as f64 / elapsed_s
        ),
    );

    if let Some(MetricValues::Trend {
        avg,
        min,
        max,
        p50,
        p90,
        p95,
        p99,
        ..
    }) = values_of(summary, metric_names::HTTP_REQ_DURATION)
    {
        push_metric(
            &mut out,
            metric_names::HTTP_REQ_DURATION,
            format!(
                "avg={} min={} p50={} p90={} p95={} p99={} max={}",
                format_ms(*avg),
                format_ms(*min),
                format_ms(*p50),
                format_ms(*p90),
                format_ms(*p95),
                format_ms(*p99),
                format_ms(*max)
            ),
        );
    }

    push_rate(summary, &mut out, metric_names::HTTP_REQ_FAILED);
    push_rate(summary, &mut out, metric_names::CHECKS);
    push_rate(summary, &mut out, metric_names::ERRORS);

    // Per-endpoint latency, indented under the base trend.
    let endpoints: Vec<_> = summary
        .metrics
        .series
        .iter()
        .filter(|s| s.name == metric_names::HTTP_REQ_DURATION && !s.tags.is_empty())
        .collect();
    for series in endpoints {
        let label = series
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        if let MetricValues::Trend { avg, p95, count, .. } = &series.values {
            push_metric(
                &mut out,
                &format!("  {{{label}}}"),
                format!(
                    "count={count} avg={} p95={}",
                    format_ms(*avg),
                    format_ms(*p95)
                ),
            );
        }
    }

    if !summary.verdict.results.is_empty() {
        push_line(&mut out, String::new());
        push_line(&mut out, "thresholds:".to_string());
        for r in &summary.verdict.results {
            let mark = match r.reason {
                ThresholdReason::Met => "✓",
                ThresholdReason::Breached => "✗",
                ThresholdReason::Indeterminate => "?",
            };
            let observed = match r.observed {
                Some(v) => format!("observed {v:.4}"),
                None => "no samples".to_string(),
            };
            push_line(
                &mut out,
                format!("  {mark} {}: {} ({observed})", r.metric, r.expression),
            );
        }
        let failed = summary.verdict.results.iter().filter(|r| !r.passed).count();
        if summary.verdict.all_passed {
            push_line(&mut out, "all thresholds passed".to_string());
        } else {
            push_line(&mut out, format!("{failed} threshold(s) failed"));
        }
    }

    out
}

fn values_of<'a>(summary: &'a RunSummary, name: &str) -> Option<&'a MetricValues> {
    summary.metrics.base_series(name).map(|s| &s.values)
}

fn push_rate(summary: &RunSummary, out: &mut String, name: &str) {
    if let Some(MetricValues::Rate { total, trues, rate }) = values_of(summary, name) {
        let pct = rate.map_or_else(|| "-".to_string(), |r| format!("{:.2}%", r * 100.0));
        push_metric(out, name, format!("{pct} ({trues} of {total})"));
    }
}

fn push_metric(out: &mut String, name: &str, value: String) {
    let dots = ".".repeat(24usize.saturating_sub(name.len()).max(2));
    push_line(out, format!("{name} {dots} {value}"));
}

fn push_line(out: &mut String, line: String) {
    out.push_str(&line);
    out.push('\n');
}

fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) => format!("{ms:.2}ms"),
        None => "-".to_string(),
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else if total > 0 {
        format!("{s}s")
    } else {
        format!("{}ms", d.as_millis())
    }
}
