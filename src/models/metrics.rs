use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const RESPONSE_TIME: &str = "response_time";
pub const ERRORS: &str = "errors";
pub const CHECKS: &str = "checks";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQS: &str = "http_reqs";
pub const ITERATIONS: &str = "iterations";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Trend,
    Rate,
    Counter,
    Gauge,
}

impl MetricKind {
    /// Kind of a built-in metric, `None` for names the runner does not emit.
    pub fn of(name: &str) -> Option<Self> {
        match name {
            HTTP_REQ_DURATION | RESPONSE_TIME => Some(MetricKind::Trend),
            ERRORS | CHECKS | HTTP_REQ_FAILED => Some(MetricKind::Rate),
            HTTP_REQS | ITERATIONS => Some(MetricKind::Counter),
            VUS | VUS_MAX => Some(MetricKind::Gauge),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Trend => "trend",
            MetricKind::Rate => "rate",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Contribution to the `errors` rate: 0 for success, 1 for failure.
    pub fn error_indicator(self) -> u64 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
        }
    }
}

/// One latency/outcome observation. `latency` is `None` when no response was
/// received, so a transport failure never reads as a fast response.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub latency: Option<Duration>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Everything one iteration reports to the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub sample: Sample,
    pub checks: Vec<CheckResult>,
    /// HTTP status code, or an error kind such as `TIMEOUT` for transport failures.
    pub status_key: String,
    pub transport_failed: bool,
}

impl IterationRecord {
    pub fn outcome(&self) -> Outcome {
        self.sample.outcome
    }
}
