use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    let unit = unit_str.trim();
    match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary with a live progress bar.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "rampr",
    author,
    version,
    about = "Staged virtual-user load generator for HTTP services",
    long_about = "rampr drives a pool of virtual users against an HTTP service.\n\nA scenario file (YAML) declares a stage curve (ramp/hold/ramp-down of concurrent users), the request steps each user loops through, response checks, and pass/fail thresholds over the collected metrics.\n\nThe scenario's base URL can be overridden with --base-url or the BASE_URL environment variable."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load scenario
    #[command(
        long_about = "Run a scenario file and ramp virtual users along its stage curve.\n\nCLI flags override values from the scenario file."
    )]
    Run(RunArgs),

    /// Scaffold a starter scenario file
    Init(InitArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Target directory to initialize (created if missing)
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,

    /// Scenario filename to create in the target directory
    #[arg(long, default_value = "scenario.yaml")]
    pub scenario: String,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario file (.yaml)
    pub scenario: PathBuf,

    /// Override the scenario's base URL (flag wins over the environment)
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Replace the stage curve with a constant number of virtual users
    #[arg(long)]
    pub vus: Option<u64>,

    /// Duration for --vus (e.g. 10s, 250ms, 1m); defaults to the scenario's total
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Seed for per-user random endpoint selection
    #[arg(long)]
    pub seed: Option<u64>,

    /// Per-request timeout (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}
