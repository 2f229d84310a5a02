use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::config::metric_names;

/// One request's worth of measurement, produced by a scenario runner and
/// folded into the collector; individual outcomes are not retained.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Step label (the request path unless the step names itself).
    pub endpoint: String,
    /// 0 is the transport-failure sentinel (connect error, timeout).
    pub status: u16,
    pub latency: Duration,
    pub checks_passed: bool,
    /// Transport error reason, when `status == 0`.
    pub error: Option<String>,
    /// Elapsed run time when the outcome was produced.
    pub timestamp: Duration,
}

impl RequestOutcome {
    /// Failed means the transport sentinel or an HTTP error status.
    pub fn is_failure(&self) -> bool {
        self.status == 0 || self.status >= 400
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Trend,
    Counter,
    Gauge,
    Rate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValues,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValues {
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

/// Immutable copy of every series, taken without blocking ingestion.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub series: Vec<SeriesSummary>,
}

impl MetricsSnapshot {
    /// The untagged base series for a metric name.
    pub fn base_series(&self, name: &str) -> Option<&SeriesSummary> {
        self.series
            .iter()
            .find(|s| s.name == name && s.tags.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagSet(Arc<[(Arc<str>, Arc<str>)]>);

impl Hash for TagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (k, v) in self.0.iter() {
            k.hash(state);
            v.hash(state);
        }
    }
}

fn normalize_tags(tags: &[(&str, &str)]) -> TagSet {
    if tags.is_empty() {
        return TagSet(Arc::from([]));
    }

    let mut v: Vec<(Arc<str>, Arc<str>)> = tags
        .iter()
        .map(|(k, v)| (Arc::<str>::from(*k), Arc::<str>::from(*v)))
        .collect();
    v.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    TagSet(Arc::from(v.into_boxed_slice()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    kind: MetricKind,
    name: Arc<str>,
    tags: TagSet,
}

/// Latency trends go into an HDR histogram with 3 significant figures,
/// recorded at 1/1000 ms resolution; quantile error is therefore bounded
/// at 0.1% of the reported value, with fixed worst-case memory. Counters,
/// min/max and rates are plain atomics. All updates are commutative, so
/// ingestion order across writers cannot change a snapshot.
#[derive(Debug)]
struct TrendAgg {
    count: AtomicU64,
    sum_scaled: AtomicU64,
    min_scaled: AtomicU64,
    max_scaled: AtomicU64,
    hist: Mutex<Histogram<u64>>,
}

impl TrendAgg {
    fn new() -> Self {
        let hist = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3)
            .unwrap_or_else(|err| panic!("failed to init histogram: {err}"));
        Self {
            count: AtomicU64::new(0),
            sum_scaled: AtomicU64::new(0),
            min_scaled: AtomicU64::new(u64::MAX),
            max_scaled: AtomicU64::new(0),
            hist: Mutex::new(hist),
        }
    }

    fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let scaled = (value * 1000.0).round();
        if scaled < 1.0 {
            return;
        }
        let scaled = scaled as u64;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_scaled.fetch_add(scaled, Ordering::Relaxed);

        let mut cur = self.min_scaled.load(Ordering::Relaxed);
        while scaled < cur {
            match self.min_scaled.compare_exchange_weak(
                cur,
                scaled,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(v) => cur = v,
            }
        }

        let mut cur = self.max_scaled.load(Ordering::Relaxed);
        while scaled > cur {
            match self.max_scaled.compare_exchange_weak(
                cur,
                scaled,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(v) => cur = v,
            }
        }

        let mut h = self.hist.lock().unwrap_or_else(|p| p.into_inner());
        let _ = h.record(scaled);
    }

    fn summarize(&self) -> MetricValues {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return MetricValues::Trend {
                count: 0,
                min: None,
                max: None,
                avg: None,
                p50: None,
                p90: None,
                p95: None,
                p99: None,
            };
        }

        let sum = self.sum_scaled.load(Ordering::Relaxed) as f64;
        let min = self.min_scaled.load(Ordering::Relaxed);
        let max = self.max_scaled.load(Ordering::Relaxed);

        let h = self.hist.lock().unwrap_or_else(|p| p.into_inner());
        let quantile = |q: f64| Some(h.value_at_quantile(q) as f64 / 1000.0);

        MetricValues::Trend {
            count,
            min: Some(min as f64 / 1000.0),
            max: Some(max as f64 / 1000.0),
            avg: Some(sum / (count as f64) / 1000.0),
            p50: quantile(0.50),
            p90: quantile(0.90),
            p95: quantile(0.95),
            p99: quantile(0.99),
        }
    }
}

#[derive(Debug, Default)]
struct ScalarAgg {
    value: Mutex<f64>,
}

impl ScalarAgg {
    fn add(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        let mut guard = self.value.lock().unwrap_or_else(|p| p.into_inner());
        *guard += v;
    }

    fn set(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        let mut guard = self.value.lock().unwrap_or_else(|p| p.into_inner());
        *guard = v;
    }

    fn get(&self) -> f64 {
        *self.value.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Default)]
struct RateAgg {
    total: AtomicU64,
    trues: AtomicU64,
}

impl RateAgg {
    fn add(&self, v: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if v {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn summarize(&self) -> MetricValues {
        let total = self.total.load(Ordering::Relaxed);
        let trues = self.trues.load(Ordering::Relaxed);
        let rate = if total == 0 {
            None
        } else {
            Some(trues as f64 / total as f64)
        };
        MetricValues::Rate { total, trues, rate }
    }
}

#[derive(Debug)]
enum Agg {
    Trend(TrendAgg),
    Counter(ScalarAgg),
    Gauge(ScalarAgg),
    Rate(RateAgg),
}

#[derive(Debug)]
struct Series {
    name: Arc<str>,
    kind: MetricKind,
    tags: TagSet,
    agg: Agg,
}

impl Series {
    fn new(kind: MetricKind, name: Arc<str>, tags: TagSet) -> Self {
        let agg = match kind {
            MetricKind::Trend => Agg::Trend(TrendAgg::new()),
            MetricKind::Counter => Agg::Counter(ScalarAgg::default()),
            MetricKind::Gauge => Agg::Gauge(ScalarAgg::default()),
            MetricKind::Rate => Agg::Rate(RateAgg::default()),
        };
        Self {
            name,
            kind,
            tags,
            agg,
        }
    }

    fn add(&self, value: f64) {
        match &self.agg {
            Agg::Trend(t) => t.record(value),
            Agg::Counter(c) => c.add(value),
            Agg::Gauge(g) => g.set(value),
            // Rates take booleans; ignore numeric adds.
            Agg::Rate(_) => {}
        }
    }

    fn add_bool(&self, value: bool) {
        if let Agg::Rate(r) = &self.agg {
            r.add(value);
        }
    }

    fn summarize(&self) -> SeriesSummary {
        let tags: Vec<(String, String)> = self
            .tags
            .0
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let values = match &self.agg {
            Agg::Trend(t) => t.summarize(),
            Agg::Counter(c) => MetricValues::Counter { value: c.get() },
            Agg::Gauge(g) => MetricValues::Gauge { value: g.get() },
            Agg::Rate(r) => r.summarize(),
        };

        SeriesSummary {
            name: self.name.to_string(),
            kind: self.kind,
            tags,
            values,
        }
    }
}

/// Aggregates request outcomes from any number of concurrent scenario
/// runners. The eight built-in series are reached through cached
/// `Arc<Series>` handles; the series map is locked only to resolve tagged
/// series (per endpoint, per check).
#[derive(Debug)]
pub struct MetricsCollector {
    series: Mutex<HashMap<SeriesKey, Arc<Series>>>,

    http_reqs: Arc<Series>,
    http_req_duration: Arc<Series>,
    http_req_failed: Arc<Series>,
    checks: Arc<Series>,
    iterations: Arc<Series>,
    iteration_duration: Arc<Series>,
    errors: Arc<Series>,
    vus: Arc<Series>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        let mut map = HashMap::new();

        let mut base = |kind: MetricKind, name: &str| -> Arc<Series> {
            let name: Arc<str> = Arc::from(name);
            let tags = TagSet(Arc::from([]));
            let series = Arc::new(Series::new(kind, name.clone(), tags.clone()));
            map.insert(SeriesKey { kind, name, tags }, series.clone());
            series
        };

        let http_reqs = base(MetricKind::Counter, metric_names::HTTP_REQS);
        let http_req_duration = base(MetricKind::Trend, metric_names::HTTP_REQ_DURATION);
        let http_req_failed = base(MetricKind::Rate, metric_names::HTTP_REQ_FAILED);
        let checks = base(MetricKind::Rate, metric_names::CHECKS);
        let iterations = base(MetricKind::Counter, metric_names::ITERATIONS);
        let iteration_duration = base(MetricKind::Trend, metric_names::ITERATION_DURATION);
        let errors = base(MetricKind::Rate, metric_names::ERRORS);
        let vus = base(MetricKind::Gauge, metric_names::VUS);

        Self {
            series: Mutex::new(map),
            http_reqs,
            http_req_duration,
            http_req_failed,
            checks,
            iterations,
            iteration_duration,
            errors,
            vus,
        }
    }
}

impl MetricsCollector {
    pub fn ingest(&self, outcome: &RequestOutcome) {
        let latency_ms = outcome.latency.as_secs_f64() * 1000.0;

        self.http_reqs.add(1.0);
        self.http_req_duration.add(latency_ms);
        self.tagged(
            MetricKind::Trend,
            metric_names::HTTP_REQ_DURATION,
            &[("endpoint", &outcome.endpoint)],
        )
        .add(latency_ms);
        self.http_req_failed.add_bool(outcome.is_failure());
        // The error series counts an outcome bad if its checks failed OR the
        // request itself failed.
        self.errors
            .add_bool(outcome.is_failure() || !outcome.checks_passed);
    }

    pub fn record_check(&self, name: &str, passed: bool) {
        self.checks.add_bool(passed);
        self.tagged(MetricKind::Rate, metric_names::CHECKS, &[("check", name)])
            .add_bool(passed);
    }

    /// One completed scenario iteration.
    pub fn record_iteration(&self, elapsed: Duration) {
        self.iterations.add(1.0);
        self.iteration_duration.add(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn set_active_vus(&self, n: u64) {
        self.vus.add(n as f64);
    }

    pub fn iterations_total(&self) -> u64 {
        match &self.iterations.agg {
            Agg::Counter(c) => c.get() as u64,
            _ => 0,
        }
    }

    pub fn requests_total(&self) -> u64 {
        match &self.http_reqs.agg {
            Agg::Counter(c) => c.get() as u64,
            _ => 0,
        }
    }

    pub fn failed_requests_total(&self) -> u64 {
        match &self.http_req_failed.agg {
            Agg::Rate(r) => r.trues.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn checks_failed_total(&self) -> u64 {
        match &self.checks.agg {
            Agg::Rate(r) => {
                let total = r.total.load(Ordering::Relaxed);
                total.saturating_sub(r.trues.load(Ordering::Relaxed))
            }
            _ => 0,
        }
    }

    fn tagged(&self, kind: MetricKind, name: &str, tags: &[(&str, &str)]) -> Arc<Series> {
        let name: Arc<str> = Arc::from(name);
        let tags = normalize_tags(tags);
        let key = SeriesKey {
            kind,
            name: name.clone(),
            tags: tags.clone(),
        };

        let mut map = self.series.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = map.get(&key) {
            return existing.clone();
        }

        let series = Arc::new(Series::new(kind, name, tags));
        map.insert(key, series.clone());
        series
    }

    /// Copy-on-read snapshot; ingestion continues while it is taken.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let map = self.series.lock().unwrap_or_else(|p| p.into_inner());
        let mut series: Vec<SeriesSummary> = map.values().map(|s| s.summarize()).collect();
        drop(map);

        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        MetricsSnapshot { series }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(endpoint: &str, status: u16, latency_ms: u64, checks_passed: bool) -> RequestOutcome {
        RequestOutcome {
            endpoint: endpoint.to_string(),
            status,
            latency: Duration::from_millis(latency_ms),
            checks_passed,
            error: None,
            timestamp: Duration::ZERO,
        }
    }

    fn base<'a>(snap: &'a MetricsSnapshot, name: &str) -> &'a SeriesSummary {
        snap.base_series(name)
            .unwrap_or_else(|| panic!("missing series {name}"))
    }

    #[test]
    fn ingest_updates_builtin_series() {
        let collector = MetricsCollector::default();
        collector.ingest(&outcome("/health", 200, 100, true));
        collector.ingest(&outcome("/health", 500, 20, false));
        collector.ingest(&outcome("/", 0, 30, false));

        let snap = collector.snapshot();

        let MetricValues::Counter { value } = base(&snap, metric_names::HTTP_REQS).values else {
            panic!("expected counter");
        };
        assert_eq!(value, 3.0);

        let MetricValues::Rate { total, trues, rate } =
            base(&snap, metric_names::HTTP_REQ_FAILED).values
        else {
            panic!("expected rate");
        };
        assert_eq!(total, 3);
        assert_eq!(trues, 2);
        assert_eq!(rate, Some(2.0 / 3.0));
    }

    #[test]
    fn per_endpoint_latency_series_are_tagged() {
        let collector = MetricsCollector::default();
        collector.ingest(&outcome("/health", 200, 10, true));
        collector.ingest(&outcome("/api/users", 200, 50, true));

        let snap = collector.snapshot();
        let tagged: Vec<_> = snap
            .series
            .iter()
            .filter(|s| s.name == metric_names::HTTP_REQ_DURATION && !s.tags.is_empty())
            .collect();
        assert_eq!(tagged.len(), 2);
        assert!(
            tagged
                .iter()
                .any(|s| s.tags == vec![("endpoint".to_string(), "/health".to_string())])
        );
    }

    #[test]
    fn aggregation_is_order_independent() {
        let outcomes = vec![
            outcome("/", 200, 100, true),
            outcome("/", 200, 120, true),
            outcome("/", 503, 110, false),
            outcome("/", 200, 600, true),
            outcome("/", 0, 30, false),
        ];

        let forward = MetricsCollector::default();
        for o in &outcomes {
            forward.ingest(o);
        }

        let reversed = MetricsCollector::default();
        for o in outcomes.iter().rev() {
            reversed.ingest(o);
        }

        assert_eq!(forward.snapshot().series, reversed.snapshot().series);
    }

    #[test]
    fn errors_rate_counts_check_failures_and_transport_failures() {
        let collector = MetricsCollector::default();
        // Healthy request with passing checks.
        collector.ingest(&outcome("/", 200, 10, true));
        // 200 with a failing check still counts as an error.
        collector.ingest(&outcome("/", 200, 10, false));
        // Transport sentinel counts regardless of checks.
        collector.ingest(&outcome("/", 0, 10, true));

        let snap = collector.snapshot();
        let MetricValues::Rate { total, trues, rate } = base(&snap, metric_names::ERRORS).values
        else {
            panic!("expected rate");
        };
        assert_eq!(total, 3);
        assert_eq!(trues, 2);
        assert_eq!(rate, Some(2.0 / 3.0));
    }

    #[test]
    fn iterations_are_counted_with_durations() {
        let collector = MetricsCollector::default();
        collector.record_iteration(Duration::from_millis(300));
        collector.record_iteration(Duration::from_millis(310));

        assert_eq!(collector.iterations_total(), 2);

        let snap = collector.snapshot();
        let MetricValues::Trend { count, .. } =
            base(&snap, metric_names::ITERATION_DURATION).values
        else {
            panic!("expected trend");
        };
        assert_eq!(count, 2);
    }

    #[test]
    fn check_results_keep_per_check_series() {
        let collector = MetricsCollector::default();
        collector.record_check("status is 200", true);
        collector.record_check("status is 200", false);
        collector.record_check("has users", true);

        assert_eq!(collector.checks_failed_total(), 1);

        let snap = collector.snapshot();
        let named = snap
            .series
            .iter()
            .find(|s| {
                s.name == metric_names::CHECKS
                    && s.tags == vec![("check".to_string(), "status is 200".to_string())]
            })
            .unwrap_or_else(|| panic!("missing tagged check series"));
        let MetricValues::Rate { total, trues, .. } = named.values else {
            panic!("expected rate");
        };
        assert_eq!((total, trues), (2, 1));
    }

    #[test]
    fn trend_percentiles_reflect_the_distribution() {
        let collector = MetricsCollector::default();
        for _ in 0..19 {
            collector.ingest(&outcome("/", 200, 110, true));
        }
        collector.ingest(&outcome("/", 200, 600, true));

        let snap = collector.snapshot();
        let MetricValues::Trend { count, p95, max, .. } =
            base(&snap, metric_names::HTTP_REQ_DURATION).values
        else {
            panic!("expected trend");
        };
        assert_eq!(count, 20);
        // The single 600ms outlier sits in the top 5%; p95 stays near 110ms.
        let p95 = p95.unwrap_or_else(|| panic!("missing p95"));
        assert!(p95 < 500.0, "p95 = {p95}");
        let max = max.unwrap_or_else(|| panic!("missing max"));
        assert!((max - 600.0).abs() < 1.0, "max = {max}");
    }
}
