//! Threshold evaluation over a metrics snapshot.

use serde::Serialize;
use std::time::Duration;

use crate::metrics::collector::MetricsSnapshot;
use crate::models::threshold::Threshold;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric had no data; such a threshold does not hold.
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThresholdReport {
    pub results: Vec<ThresholdResult>,
}

impl ThresholdReport {
    /// AND over every threshold; an empty set passes.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

pub fn evaluate_one(threshold: &Threshold, snapshot: &MetricsSnapshot) -> ThresholdResult {
    let observed = snapshot.value(&threshold.metric, threshold.expr.aggregation);
    let passed = observed
        .map(|value| threshold.expr.op.holds(value, threshold.expr.value))
        .unwrap_or(false);
    ThresholdResult {
        metric: threshold.metric.clone(),
        expression: threshold.expr.to_string(),
        observed,
        passed,
    }
}

/// Evaluates every threshold, including the ones after a failure.
pub fn evaluate(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> ThresholdReport {
    ThresholdReport {
        results: thresholds
            .iter()
            .map(|threshold| evaluate_one(threshold, snapshot))
            .collect(),
    }
}

/// First armed `abortOnFail` threshold that is currently breached.
///
/// Metrics without data yet are not treated as a breach here.
pub fn abort_breach(
    thresholds: &[Threshold],
    snapshot: &MetricsSnapshot,
    elapsed: Duration,
) -> Option<ThresholdResult> {
    thresholds
        .iter()
        .filter(|threshold| threshold.abort_armed(elapsed))
        .map(|threshold| evaluate_one(threshold, snapshot))
        .find(|result| result.observed.is_some() && !result.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::collector::MetricsCollector;
    use crate::models::metrics::{CheckResult, IterationRecord, Outcome, Sample};
    use chrono::Utc;

    fn record(latency_ms: u64, outcome: Outcome) -> IterationRecord {
        IterationRecord {
            sample: Sample {
                timestamp: Utc::now(),
                latency: Some(Duration::from_millis(latency_ms)),
                outcome,
            },
            checks: vec![CheckResult {
                name: "status is 200".into(),
                passed: outcome == Outcome::Success,
            }],
            status_key: "200".into(),
            transport_failed: false,
        }
    }

    fn product_thresholds() -> Vec<Threshold> {
        vec![
            Threshold::parse("http_req_duration", "p(95)<100").unwrap(),
            Threshold::parse("errors", "rate==0").unwrap(),
        ]
    }

    #[test]
    fn all_fast_successes_pass() {
        let collector = MetricsCollector::new();
        let shard = collector.shard();
        for ms in 10..60 {
            shard.record(&record(ms, Outcome::Success));
        }
        let report = evaluate(&product_thresholds(), &collector.snapshot());
        assert!(report.passed());
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].observed, Some(0.0));
    }

    #[test]
    fn single_failure_breaks_zero_error_rate() {
        let collector = MetricsCollector::new();
        let shard = collector.shard();
        for ms in 10..60 {
            shard.record(&record(ms, Outcome::Success));
        }
        shard.record(&record(30, Outcome::Failure));
        let report = evaluate(&product_thresholds(), &collector.snapshot());
        assert!(!report.passed());
        assert!(report.results[0].passed);
        assert!(!report.results[1].passed);
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn every_threshold_is_reported_even_after_a_failure() {
        let collector = MetricsCollector::new();
        let shard = collector.shard();
        for _ in 0..20 {
            shard.record(&record(250, Outcome::Failure));
        }
        let report = evaluate(&product_thresholds(), &collector.snapshot());
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| !r.passed));
        assert!(report.results[0].observed.unwrap() >= 249.0);
        assert_eq!(report.results[1].observed, Some(1.0));
    }

    #[test]
    fn response_time_reads_the_request_duration_trend() {
        let collector = MetricsCollector::new();
        let shard = collector.shard();
        for ms in 1..=100 {
            shard.record(&record(ms * 2, Outcome::Success));
        }
        let snapshot = collector.snapshot();
        let thresholds = vec![
            Threshold::parse("response_time", "p(95)<100").unwrap(),
            Threshold::parse("response_time", "avg<150").unwrap(),
        ];
        let report = evaluate(&thresholds, &snapshot);

        assert!(!report.results[0].passed);
        assert!(report.results[1].passed);
        assert_eq!(
            report.results[0].observed,
            evaluate_one(&Threshold::parse("http_req_duration", "p(95)<100").unwrap(), &snapshot)
                .observed
        );
    }

    #[test]
    fn metrics_without_data_fail() {
        let collector = MetricsCollector::new();
        let report = evaluate(&product_thresholds(), &collector.snapshot());
        assert!(!report.passed());
        assert!(report.results.iter().all(|r| r.observed.is_none()));
    }

    #[test]
    fn empty_threshold_set_passes() {
        let collector = MetricsCollector::new();
        assert!(evaluate(&[], &collector.snapshot()).passed());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let collector = MetricsCollector::new();
        let shard = collector.shard();
        for ms in 1..200 {
            let outcome = if ms % 50 == 0 {
                Outcome::Failure
            } else {
                Outcome::Success
            };
            shard.record(&record(ms, outcome));
        }
        let snapshot = collector.snapshot();
        let first = evaluate(&product_thresholds(), &snapshot);
        let second = evaluate(&product_thresholds(), &snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn abort_breach_only_for_armed_thresholds() {
        let collector = MetricsCollector::new();
        let shard = collector.shard();
        shard.record(&record(10, Outcome::Failure));
        let snapshot = collector.snapshot();

        let mut thresholds = product_thresholds();
        assert!(abort_breach(&thresholds, &snapshot, Duration::from_secs(1)).is_none());

        thresholds[1].abort_on_fail = true;
        thresholds[1].delay_abort_eval = Some(Duration::from_secs(5));
        assert!(abort_breach(&thresholds, &snapshot, Duration::from_secs(1)).is_none());

        let breach = abort_breach(&thresholds, &snapshot, Duration::from_secs(5)).unwrap();
        assert_eq!(breach.metric, "errors");
        assert_eq!(breach.observed, Some(1.0));
    }
}
