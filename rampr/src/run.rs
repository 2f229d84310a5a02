use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use rampr_core::HttpClient;
use rampr_core::runner::{CancelSignal, ScenarioConfig, Stage, run_scenario};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::scenario_yaml;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let yaml = scenario_yaml::load_scenario_yaml(&args.scenario)
        .await
        .map_err(RunError::InvalidInput)?;

    let default_name = args
        .scenario
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("main");
    let mut config =
        scenario_yaml::into_config(yaml, default_name).map_err(RunError::InvalidInput)?;

    apply_overrides(&mut config, &args);
    config.validate().map_err(RunError::from)?;

    out.print_header(&args.scenario, &config);

    let cancel = Arc::new(CancelSignal::new());
    spawn_ctrl_c_handler(Arc::clone(&cancel));

    let transport = Arc::new(HttpClient::default());
    let summary = run_scenario(config, transport, cancel, out.progress())
        .await
        .map_err(RunError::from)?;

    out.print_summary(&summary)
        .context("failed to print summary")
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_quality_gates(
        summary.checks_failed_total > 0,
        !summary.verdict.all_passed,
    ))
}

/// CLI flags win over the scenario file; `--base-url` also wins over the
/// `BASE_URL` environment variable (clap resolves that precedence).
fn apply_overrides(config: &mut ScenarioConfig, args: &RunArgs) {
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout = timeout;
    }

    // --vus/--duration replace the whole curve with a constant plateau.
    if args.vus.is_some() || args.duration.is_some() {
        let total = config
            .stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        let target = args.vus.unwrap_or_else(|| config.max_vus().max(1));
        let duration = args
            .duration
            .unwrap_or(if total.is_zero() { Duration::from_secs(60) } else { total });

        config.start_vus = target;
        config.stages = vec![Stage { duration, target }];
    }
}

fn spawn_ctrl_c_handler(cancel: Arc<CancelSignal>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted, draining virtual users (press again to force quit)");
            cancel.cancel();

            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(ExitCode::RuntimeError.as_i32());
            }
        }
    });
}
