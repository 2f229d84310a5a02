use anyhow::Context as _;

use crate::cli::InitArgs;

const STARTER_SCENARIO: &str = r#"# rampr scenario
#
# Ramp to 10 virtual users, hold, then ramp down. Each user loops through
# the steps below with a 1s pause per iteration.
name: baseline
baseUrl: http://localhost:8080
startVUs: 0

stages:
  - duration: 30s
    target: 10
  - duration: 1m
    target: 10
  - duration: 30s
    target: 0

steps:
  - path: /health
    checks:
      - statusIs: 200
      - fieldEquals: { field: status, value: healthy }
  - path: /api/users
    checks:
      - statusIs: 200
      - fieldIsArray: users
  - sleep: 1s

thresholds:
  http_req_duration: ["p(95)<500"]
  errors: rate<0.05
"#;

pub async fn init(args: InitArgs) -> anyhow::Result<()> {
    let root = &args.dir;
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create dir: {}", root.display()))?;

    let path = root.join(&args.scenario);
    if !args.force
        && tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("failed to stat: {}", path.display()))?
    {
        anyhow::bail!(
            "refusing to overwrite existing file: {} (use --force)",
            path.display()
        );
    }

    tokio::fs::write(&path, STARTER_SCENARIO)
        .await
        .with_context(|| format!("failed to write: {}", path.display()))?;

    println!("created {}", path.display());
    println!("run it with: rampr run {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_scenario_is_valid() {
        let yaml: crate::scenario_yaml::ScenarioYaml =
            serde_yaml::from_str(STARTER_SCENARIO).unwrap_or_else(|e| panic!("{e:#}"));
        let cfg = crate::scenario_yaml::into_config(yaml, "scenario")
            .unwrap_or_else(|e| panic!("{e:#}"));
        cfg.validate().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(cfg.name, "baseline");
        assert_eq!(cfg.max_vus(), 10);
    }
}
