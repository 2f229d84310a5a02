use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use rampr_core::runner::{
    Check, RequestStep, RequestTarget, ScenarioConfig, Stage, Step, ThresholdSet,
};

/// On-disk scenario schema. Field names are camelCase to match the
/// conventions of the load-test scripts people migrate from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScenarioYaml {
    /// Scenario name; defaults to the file stem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: u64,

    pub stages: Vec<StageYaml>,

    /// Endpoint paths eligible for `randomEndpoint` steps.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub endpoints: Vec<String>,

    pub steps: Vec<StepYaml>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub thresholds: BTreeMap<String, ThresholdExprYaml>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum StepYaml {
    Sleep { sleep: YamlDuration },
    Request(RequestStepYaml),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestStepYaml {
    /// Fixed request path; mutually exclusive with `randomEndpoint`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<String>,

    /// Draw the path from the scenario's `endpoints` each iteration.
    #[serde(default)]
    pub random_endpoint: bool,

    /// Series label; defaults to the path (or `random`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    /// HTTP method; defaults to GET.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub checks: Vec<CheckYaml>,
}

/// One predicate per entry; exactly one of the predicate fields must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckYaml {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status_is: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status_class: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub has_field: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field_equals: Option<FieldEqualsYaml>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub field_is_array: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FieldEqualsYaml {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl From<Duration> for YamlDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl Serialize for YamlDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(self.0).to_string())
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v <= 0 {
                    return Err(E::custom("duration must be positive"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v <= 0.0 {
                    return Err(E::custom("duration must be a positive, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub(crate) async fn load_scenario_yaml(path: &Path) -> anyhow::Result<ScenarioYaml> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read scenario file: {}", path.display()))?;

    serde_yaml::from_slice(&bytes).with_context(|| format!("failed to parse: {}", path.display()))
}

pub(crate) fn into_config(yaml: ScenarioYaml, default_name: &str) -> anyhow::Result<ScenarioConfig> {
    let ScenarioYaml {
        name,
        base_url,
        start_vus,
        stages,
        endpoints,
        steps,
        thresholds,
        request_timeout,
        seed,
    } = yaml;

    let steps = steps
        .into_iter()
        .map(step_from_yaml)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ScenarioConfig {
        name: name.unwrap_or_else(|| default_name.to_string()),
        base_url: base_url.unwrap_or_else(|| "http://localhost:8080".to_string()),
        start_vus,
        stages: stages
            .into_iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
        endpoints,
        steps,
        thresholds: thresholds_from_map(thresholds),
        request_timeout: request_timeout
            .map(YamlDuration::into_inner)
            .unwrap_or(ScenarioConfig::DEFAULT_REQUEST_TIMEOUT),
        reconcile_interval: ScenarioConfig::DEFAULT_RECONCILE_INTERVAL,
        seed: seed.unwrap_or(0),
    })
}

fn step_from_yaml(step: StepYaml) -> anyhow::Result<Step> {
    match step {
        StepYaml::Sleep { sleep } => Ok(Step::Sleep(sleep.into_inner())),
        StepYaml::Request(req) => {
            let target = match (&req.path, req.random_endpoint) {
                (Some(_), true) => {
                    anyhow::bail!("a step cannot set both `path` and `randomEndpoint`")
                }
                (Some(path), false) => RequestTarget::Path(path.clone()),
                (None, true) => RequestTarget::RandomEndpoint,
                (None, false) => {
                    anyhow::bail!("a request step needs either `path` or `randomEndpoint: true`")
                }
            };

            let name = req.name.clone().unwrap_or_else(|| match &target {
                RequestTarget::Path(path) => path.clone(),
                RequestTarget::RandomEndpoint => "random".to_string(),
            });

            let method = match req.method.as_deref() {
                None => http::Method::GET,
                Some(raw) => raw
                    .to_ascii_uppercase()
                    .parse::<http::Method>()
                    .map_err(|_| anyhow::anyhow!("invalid HTTP method `{raw}`"))?,
            };

            let checks = req
                .checks
                .into_iter()
                .map(check_from_yaml)
                .collect::<anyhow::Result<Vec<_>>>()?;

            Ok(Step::Request(RequestStep {
                name,
                method,
                target,
                checks,
            }))
        }
    }
}

fn check_from_yaml(check: CheckYaml) -> anyhow::Result<Check> {
    let CheckYaml {
        name,
        status_is,
        status_class,
        has_field,
        field_equals,
        field_is_array,
    } = check;

    let set = [
        status_is.is_some(),
        status_class.is_some(),
        has_field.is_some(),
        field_equals.is_some(),
        field_is_array.is_some(),
    ]
    .iter()
    .filter(|v| **v)
    .count();
    if set != 1 {
        anyhow::bail!(
            "a check needs exactly one of `statusIs`, `statusClass`, `hasField`, `fieldEquals`, `fieldIsArray`"
        );
    }

    if let Some(status) = status_is {
        let name = name.unwrap_or_else(|| format!("status is {status}"));
        return Ok(Check::StatusIs { name, status });
    }
    if let Some(class) = status_class {
        if !(1..=5).contains(&class) {
            anyhow::bail!("`statusClass` must be 1..=5, got {class}");
        }
        let name = name.unwrap_or_else(|| format!("status is {class}xx"));
        return Ok(Check::StatusClass { name, class });
    }
    if let Some(field) = has_field {
        let name = name.unwrap_or_else(|| format!("body has {field}"));
        return Ok(Check::BodyHasField { name, field });
    }
    if let Some(eq) = field_equals {
        let name = name.unwrap_or_else(|| format!("{} is {}", eq.field, eq.value));
        return Ok(Check::BodyFieldEquals {
            name,
            field: eq.field,
            value: eq.value,
        });
    }
    let field = field_is_array
        .ok_or_else(|| anyhow::anyhow!("a check needs exactly one predicate"))?;
    let name = name.unwrap_or_else(|| format!("{field} is an array"));
    Ok(Check::BodyFieldIsArray { name, field })
}

fn thresholds_from_map(raw: BTreeMap<String, ThresholdExprYaml>) -> Vec<ThresholdSet> {
    raw.into_iter()
        .map(|(metric, v)| {
            let expressions = match v {
                ThresholdExprYaml::One(s) => vec![s],
                ThresholdExprYaml::Many(v) => v,
            };
            ThresholdSet {
                metric,
                expressions,
            }
        })
        .collect()
}
