use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::http::{HttpRequest, HttpResponse, Transport};

use super::config::{RequestStep, RequestTarget, ScenarioConfig, Step};
use super::metrics::{MetricsCollector, RequestOutcome};
use super::vu::{CancelSignal, VirtualUser, VuState};

/// Drives one virtual user through the scenario's step list, iteration
/// after iteration, until the user is retired or the run is cancelled.
/// Both conditions are consulted only at iteration boundaries; an
/// iteration that has started always runs to completion.
pub struct ScenarioRunner<T> {
    vu: Arc<VirtualUser>,
    config: Arc<ScenarioConfig>,
    transport: Arc<T>,
    collector: Arc<MetricsCollector>,
    cancel: Arc<CancelSignal>,
    run_started: Instant,
    rng: SmallRng,
}

impl<T: Transport> ScenarioRunner<T> {
    pub fn new(
        vu: Arc<VirtualUser>,
        config: Arc<ScenarioConfig>,
        transport: Arc<T>,
        collector: Arc<MetricsCollector>,
        cancel: Arc<CancelSignal>,
        run_started: Instant,
    ) -> Self {
        // Per-user stream derived from the scenario seed, so two runs with
        // the same seed draw the same endpoint sequences.
        let stream = config.seed ^ vu.id().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let rng = SmallRng::seed_from_u64(stream);
        Self {
            vu,
            config,
            transport,
            collector,
            cancel,
            run_started,
            rng,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(vu = self.vu.id(), "virtual user starting");
        while !self.vu.is_retiring() && !self.cancel.is_cancelled() {
            self.iteration().await;
        }
        tracing::debug!(vu = self.vu.id(), "virtual user exiting");
    }

    async fn iteration(&mut self) {
        let config = Arc::clone(&self.config);
        let started = Instant::now();

        // One endpoint draw per iteration, shared by every random-target
        // step in the step list.
        let drawn = if config.endpoints.is_empty() {
            None
        } else {
            Some(self.rng.gen_range(0..config.endpoints.len()))
        };

        for step in &config.steps {
            match step {
                Step::Request(request) => {
                    let outcome = self.execute_request(&config, request, drawn).await;
                    self.collector.ingest(&outcome);
                }
                Step::Sleep(pause) => {
                    self.vu.set_state(VuState::Sleeping);
                    tokio::time::sleep(*pause).await;
                }
            }
        }

        self.vu.set_state(VuState::Idle);
        self.collector.record_iteration(started.elapsed());
    }

    /// A failed or timed-out request is not an abort: it becomes an outcome
    /// with status 0 that fails the step's checks, and the iteration moves
    /// on to the next step.
    async fn execute_request(
        &self,
        config: &ScenarioConfig,
        step: &RequestStep,
        drawn: Option<usize>,
    ) -> RequestOutcome {
        self.vu.set_state(VuState::Running);

        let path = match &step.target {
            RequestTarget::Path(path) => path.as_str(),
            // `validate` guarantees endpoints is non-empty when any step
            // uses a random target.
            RequestTarget::RandomEndpoint => drawn
                .and_then(|i| config.endpoints.get(i))
                .map(String::as_str)
                .unwrap_or("/"),
        };
        let url = join_url(&config.base_url, path);

        let request = HttpRequest::new(step.method.clone(), url);
        let sent = Instant::now();
        let issued = tokio::time::timeout(config.request_timeout, self.transport.issue(request));

        let (response, error) = match issued.await {
            Ok(Ok(response)) => (response, None),
            Ok(Err(e)) => (failure_response(), Some(e.to_string())),
            Err(_) => (
                failure_response(),
                Some(format!(
                    "timed out after {:?}",
                    config.request_timeout
                )),
            ),
        };
        let latency = sent.elapsed();

        if let Some(reason) = &error {
            tracing::debug!(vu = self.vu.id(), endpoint = %step.name, %reason, "request failed");
        }

        let mut checks_passed = true;
        for check in &step.checks {
            let outcome = check.evaluate(&response);
            self.collector.record_check(&outcome.name, outcome.passed);
            checks_passed &= outcome.passed;
        }

        RequestOutcome {
            endpoint: endpoint_label(step, path),
            status: response.status,
            latency,
            checks_passed,
            error,
            timestamp: self.run_started.elapsed(),
        }
    }
}

/// Random-target steps are labelled by the path actually hit, so each
/// endpoint gets its own latency series.
fn endpoint_label(step: &RequestStep, path: &str) -> String {
    match step.target {
        RequestTarget::Path(_) => step.name.clone(),
        RequestTarget::RandomEndpoint => path.to_string(),
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn failure_response() -> HttpResponse {
    HttpResponse {
        status: 0,
        body: Bytes::new(),
    }
}
