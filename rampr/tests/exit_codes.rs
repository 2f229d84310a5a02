use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context as _;
use rampr_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn scenario_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/scenarios")
        .join(name)
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = Command::new(exe)
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--duration")
        .arg("10x")
        .output()
        .context("run rampr binary")?;

    anyhow::ensure!(
        status_code(out.status) == 30,
        "expected exit code 30, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );

    Ok(())
}

#[test]
fn missing_scenario_file_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = Command::new(exe)
        .arg("run")
        .arg("./no-such-scenario.yaml")
        .output()
        .context("run rampr binary")?;

    anyhow::ensure!(
        status_code(out.status) == 30,
        "expected exit code 30, got {}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stderr)
    );

    Ok(())
}

#[test]
fn invalid_threshold_expression_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = Command::new(exe)
        .arg("run")
        .arg(scenario_path("invalid_threshold.yaml"))
        .output()
        .context("run rampr binary")?;

    anyhow::ensure!(
        status_code(out.status) == 30,
        "expected exit code 30, got {}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stderr)
    );

    Ok(())
}

#[tokio::test]
async fn checks_failed_exit_10() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let base_url = server.base_url().to_string();

    let path = scenario_path("checks_fail.yaml");
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&path)
            .arg("--output")
            .arg("json")
            .env("BASE_URL", &base_url)
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run rampr binary")?;

    server.shutdown().await;

    anyhow::ensure!(
        status_code(out.status) == 10,
        "expected exit code 10, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );

    Ok(())
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let base_url = server.base_url().to_string();

    let path = scenario_path("thresholds_fail.yaml");
    let exe = env!("CARGO_BIN_EXE_rampr");

    let out = tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&path)
            .arg("--output")
            .arg("json")
            .env("BASE_URL", &base_url)
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run rampr binary")?;

    server.shutdown().await;

    anyhow::ensure!(
        status_code(out.status) == 11,
        "expected exit code 11, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );

    Ok(())
}
