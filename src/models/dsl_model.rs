use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::request::RequestConfig;
use crate::models::stage::{self, Stage};
use crate::models::threshold::Threshold;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Run configuration as supplied by the user (JSON document or CLI overrides).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DslConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub target: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub auth: Option<Auth>,

    #[serde(default)]
    pub query_params: Option<HashMap<String, String>>,

    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    #[serde(default)]
    pub stages: Vec<Stage>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdEntries>,

    #[serde(default)]
    pub checks: ChecksConfig,

    #[serde(default, with = "duration_opt")]
    pub timeout: Option<Duration>,

    /// Pause between iterations of one virtual user.
    #[serde(default, with = "duration_opt")]
    pub sleep: Option<Duration>,

    #[serde(default, with = "duration_opt")]
    pub graceful_stop: Option<Duration>,
}

fn default_name() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", content = "credentials")]
pub enum Auth {
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    ApiKey {
        key_name: String,
        key_value: String,
        #[serde(default = "default_in_header")]
        in_header: bool,
    },
}

fn default_in_header() -> bool {
    true
}

/// The fixed checks every iteration is judged by.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChecksConfig {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default = "default_max_duration", with = "duration")]
    pub max_duration: Duration,
}

fn default_status() -> u16 {
    200
}

fn default_max_duration() -> Duration {
    Duration::from_millis(100)
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            status: default_status(),
            max_duration: default_max_duration(),
        }
    }
}

/// `"errors": "rate==0"` or `"errors": ["rate==0", ...]`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ThresholdEntries {
    One(ThresholdSpec),
    Many(Vec<ThresholdSpec>),
}

impl ThresholdEntries {
    fn into_vec(self) -> Vec<ThresholdSpec> {
        match self {
            ThresholdEntries::One(spec) => vec![spec],
            ThresholdEntries::Many(specs) => specs,
        }
    }

    pub fn push(&mut self, spec: ThresholdSpec) {
        match self {
            ThresholdEntries::One(existing) => {
                *self = ThresholdEntries::Many(vec![existing.clone(), spec]);
            }
            ThresholdEntries::Many(specs) => specs.push(spec),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(default, rename = "delayAbortEval", with = "duration_opt")]
        delay_abort_eval: Option<Duration>,
    },
}

/// Validated, ready-to-run form of a [`DslConfig`].
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub target: String,
    pub request: RequestConfig,
    pub stages: Vec<Stage>,
    pub thresholds: Vec<Threshold>,
    pub checks: ChecksConfig,
    pub timeout: Duration,
    pub sleep: Option<Duration>,
    pub graceful_stop: Duration,
}

impl RunPlan {
    pub fn total_duration(&self) -> Duration {
        stage::total_duration(&self.stages)
    }

    pub fn max_vus(&self) -> u64 {
        stage::max_target(&self.stages)
    }
}

impl DslConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Adds a threshold expression for `metric`, keeping any configured ones.
    pub fn add_threshold(&mut self, metric: &str, expression: &str) {
        let spec = ThresholdSpec::Expr(expression.to_string());
        match self.thresholds.get_mut(metric) {
            Some(entries) => entries.push(spec),
            None => {
                self.thresholds
                    .insert(metric.to_string(), ThresholdEntries::One(spec));
            }
        }
    }

    /// Validates everything that can be checked before the first request.
    pub fn into_plan(self) -> Result<RunPlan, ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyStages);
        }
        if stage::total_duration(&self.stages).is_zero() {
            return Err(ConfigError::ZeroDuration);
        }

        let request = RequestConfig::from_dsl(&self)?;

        let mut thresholds = Vec::new();
        for (metric, entries) in self.thresholds {
            for spec in entries.into_vec() {
                let (expression, abort_on_fail, delay_abort_eval) = match spec {
                    ThresholdSpec::Expr(expression) => (expression, false, None),
                    ThresholdSpec::Detailed {
                        threshold,
                        abort_on_fail,
                        delay_abort_eval,
                    } => (threshold, abort_on_fail, delay_abort_eval),
                };
                let mut threshold = Threshold::parse(&metric, &expression).map_err(|source| {
                    ConfigError::Threshold {
                        metric: metric.clone(),
                        expression: expression.clone(),
                        source,
                    }
                })?;
                threshold.abort_on_fail = abort_on_fail;
                threshold.delay_abort_eval = delay_abort_eval;
                thresholds.push(threshold);
            }
        }

        Ok(RunPlan {
            name: self.name,
            target: self.target,
            request,
            stages: self.stages,
            thresholds,
            checks: self.checks,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            sleep: self.sleep.filter(|pause| !pause.is_zero()),
            graceful_stop: self.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
        })
    }
}

/// Human-readable durations (`"10s"`, `"500ms"`).
pub(crate) mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid duration `{raw}`: {e}")))
    }
}

pub(crate) mod duration_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.collect_str(&humantime::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|raw| {
            humantime::parse_duration(raw.trim())
                .map_err(|e| serde::de::Error::custom(format!("invalid duration `{raw}`: {e}")))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::threshold::{Aggregation, Comparison};

    const PRODUCT: &str = r#"{
        "name": "product",
        "target": "http://127.0.0.1:8080/api/v1/product",
        "auth": { "type": "Bearer", "credentials": { "token": "abc" } },
        "stages": [
            { "duration": "10s", "target": 50 },
            { "duration": "50s", "target": 100 },
            { "duration": "10s", "target": 0 }
        ],
        "thresholds": {
            "http_req_duration": ["p(95)<100"],
            "errors": "rate==0"
        }
    }"#;

    #[test]
    fn parses_product_config() {
        let config = DslConfig::from_json(PRODUCT).unwrap();
        assert_eq!(config.method, HttpMethod::GET);
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[1].duration, Duration::from_secs(50));
        assert_eq!(config.stages[1].target, 100);
        assert_eq!(config.checks.status, 200);
        assert_eq!(config.checks.max_duration, Duration::from_millis(100));

        let plan = config.into_plan().unwrap();
        assert_eq!(plan.total_duration(), Duration::from_secs(70));
        assert_eq!(plan.max_vus(), 100);
        assert_eq!(plan.timeout, DEFAULT_TIMEOUT);
        assert!(plan.sleep.is_none());
        assert_eq!(plan.thresholds.len(), 2);

        let errors = plan
            .thresholds
            .iter()
            .find(|t| t.metric == "errors")
            .unwrap();
        assert_eq!(errors.expr.aggregation, Aggregation::Rate);
        assert_eq!(errors.expr.op, Comparison::Eq);
        assert_eq!(errors.expr.value, 0.0);
    }

    #[test]
    fn empty_stage_list_is_rejected() {
        let config = DslConfig::from_json(r#"{ "target": "http://localhost/" }"#).unwrap();
        assert!(matches!(config.into_plan(), Err(ConfigError::EmptyStages)));
    }

    #[test]
    fn zero_length_run_is_rejected() {
        let config = DslConfig::from_json(
            r#"{ "target": "http://localhost/", "stages": [{ "duration": "0s", "target": 5 }] }"#,
        )
        .unwrap();
        assert!(matches!(config.into_plan(), Err(ConfigError::ZeroDuration)));
    }

    #[test]
    fn malformed_threshold_is_rejected() {
        let config = DslConfig::from_json(
            r#"{
                "target": "http://localhost/",
                "stages": [{ "duration": "1s", "target": 1 }],
                "thresholds": { "errors": ["rate=>0"] }
            }"#,
        )
        .unwrap();
        let err = config.into_plan().unwrap_err();
        assert!(matches!(err, ConfigError::Threshold { .. }));
        assert!(err.to_string().contains("errors"));
    }

    #[test]
    fn negative_stage_target_fails_to_parse() {
        let result = DslConfig::from_json(
            r#"{ "target": "http://localhost/", "stages": [{ "duration": "1s", "target": -1 }] }"#,
        );
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn bad_duration_fails_to_parse() {
        let result = DslConfig::from_json(
            r#"{ "target": "http://localhost/", "stages": [{ "duration": "ten", "target": 1 }] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn detailed_threshold_carries_abort_settings() {
        let config = DslConfig::from_json(
            r#"{
                "target": "http://localhost/",
                "stages": [{ "duration": "1s", "target": 1 }],
                "thresholds": {
                    "errors": [{ "threshold": "rate==0", "abortOnFail": true, "delayAbortEval": "5s" }]
                },
                "sleep": "1s"
            }"#,
        )
        .unwrap();
        let plan = config.into_plan().unwrap();
        assert!(plan.thresholds[0].abort_on_fail);
        assert_eq!(plan.thresholds[0].delay_abort_eval, Some(Duration::from_secs(5)));
        assert_eq!(plan.sleep, Some(Duration::from_secs(1)));
    }

    #[test]
    fn add_threshold_appends_to_existing_metric() {
        let mut config = DslConfig::from_json(PRODUCT).unwrap();
        config.add_threshold("errors", "rate<0.1");
        config.add_threshold("checks", "rate>0.99");
        let plan = config.into_plan().unwrap();
        assert_eq!(plan.thresholds.len(), 4);
        assert_eq!(
            plan.thresholds.iter().filter(|t| t.metric == "errors").count(),
            2
        );
    }
}
