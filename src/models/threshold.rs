//! Threshold expressions: `<aggregation> <op> <value>`, e.g. `p(95)<100` or
//! `rate==0`, bound to a named metric.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::metrics::MetricKind;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("missing comparison operator (one of <, <=, >, >=, ==, !=)")]
    MissingOperator,

    #[error("unknown aggregation `{0}`")]
    UnknownAggregation(String),

    #[error("percentile must be within (0, 100], got `{0}`")]
    InvalidPercentile(String),

    #[error("threshold value `{0}` is not a number")]
    InvalidValue(String),

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("aggregation `{aggregation}` does not apply to {kind} metrics")]
    NotApplicable {
        aggregation: Aggregation,
        kind: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in (0, 100].
    Percentile(f64),
    Count,
    Rate,
    Value,
}

impl Aggregation {
    pub fn applies_to(self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => matches!(
                self,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
                    | Aggregation::Count
            ),
            MetricKind::Rate => matches!(self, Aggregation::Rate),
            MetricKind::Counter => matches!(self, Aggregation::Count | Aggregation::Rate),
            MetricKind::Gauge => matches!(self, Aggregation::Value | Aggregation::Max),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "med" => Ok(Aggregation::Med),
            "count" => Ok(Aggregation::Count),
            "rate" => Ok(Aggregation::Rate),
            "value" => Ok(Aggregation::Value),
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ThresholdParseError::UnknownAggregation(other.to_string()))?;
                let percentile: f64 = inner
                    .parse()
                    .map_err(|_| ThresholdParseError::InvalidPercentile(inner.to_string()))?;
                if !(percentile > 0.0 && percentile <= 100.0) {
                    return Err(ThresholdParseError::InvalidPercentile(inner.to_string()));
                }
                Ok(Aggregation::Percentile(percentile))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(self, observed: f64, expected: f64) -> bool {
        match self {
            Comparison::Lt => observed < expected,
            Comparison::Le => observed <= expected,
            Comparison::Gt => observed > expected,
            Comparison::Ge => observed >= expected,
            Comparison::Eq => observed == expected,
            Comparison::Ne => observed != expected,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub op: Comparison,
    pub value: f64,
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();

        let (position, token, op) = Comparison::TOKENS
            .iter()
            .filter_map(|(token, op)| compact.find(token).map(|pos| (pos, *token, *op)))
            .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
            .ok_or(ThresholdParseError::MissingOperator)?;

        let aggregation: Aggregation = compact[..position].parse()?;
        let raw_value = &compact[position + token.len()..];
        let value: f64 = raw_value
            .parse()
            .map_err(|_| ThresholdParseError::InvalidValue(raw_value.to_string()))?;
        if !value.is_finite() {
            return Err(ThresholdParseError::InvalidValue(raw_value.to_string()));
        }

        Ok(Self {
            aggregation,
            op,
            value,
        })
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.op, self.value)
    }
}

/// A pass/fail criterion over one named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expr: ThresholdExpr,
    /// Checked during the run; a breach stops the run early.
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<Duration>,
}

impl Threshold {
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let kind = MetricKind::of(metric)
            .ok_or_else(|| ThresholdParseError::UnknownMetric(metric.to_string()))?;
        let expr: ThresholdExpr = expression.parse()?;
        if !expr.aggregation.applies_to(kind) {
            return Err(ThresholdParseError::NotApplicable {
                aggregation: expr.aggregation,
                kind,
            });
        }
        Ok(Self {
            metric: metric.to_string(),
            expr,
            abort_on_fail: false,
            delay_abort_eval: None,
        })
    }

    /// Abort evaluation may start once `elapsed` is past the configured delay.
    pub fn abort_armed(&self, elapsed: Duration) -> bool {
        self.abort_on_fail && elapsed >= self.delay_abort_eval.unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expr)
    }
}

/// Splits the CLI form `<metric>=<expression>`, e.g. `errors=rate==0`.
pub fn split_threshold_arg(arg: &str) -> Option<(&str, &str)> {
    let (metric, expression) = arg.split_once('=')?;
    let metric = metric.trim();
    if metric.is_empty() || expression.trim().is_empty() {
        return None;
    }
    Some((metric, expression.trim()))
}
