//! One unit of virtual-user work: send the request, judge the response.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::client::{send_request, Exchange, HttpsClient, TransportError};
use crate::models::dsl_model::ChecksConfig;
use crate::models::metrics::{CheckResult, IterationRecord, Outcome, Sample};
use crate::models::request::RequestConfig;

/// Work a virtual user repeats until it is retired.
///
/// Every call must resolve to exactly one [`IterationRecord`]; failures are
/// reported through the record, never by panicking or skipping it.
pub trait Scenario: Send + Sync + 'static {
    fn iteration(&self) -> impl Future<Output = IterationRecord> + Send;
}

/// Names of the two fixed checks, as shown in the report.
pub fn check_names(checks: &ChecksConfig) -> [String; 2] {
    [
        format!("status is {}", checks.status),
        format!(
            "response time < {}",
            humantime::format_duration(checks.max_duration)
        ),
    ]
}

/// Judges one exchange against the configured checks.
///
/// A success needs both the expected status and a latency strictly below the
/// limit. Transport failures fail both checks and carry no latency.
pub fn evaluate_checks(
    checks: &ChecksConfig,
    result: &Result<Exchange, TransportError>,
) -> IterationRecord {
    let [status_name, latency_name] = check_names(checks);
    let timestamp = Utc::now();

    match result {
        Ok(exchange) => {
            let status_ok = exchange.status.as_u16() == checks.status;
            let latency_ok = exchange.latency < checks.max_duration;
            let outcome = if status_ok && latency_ok {
                Outcome::Success
            } else {
                Outcome::Failure
            };
            IterationRecord {
                sample: Sample {
                    timestamp,
                    latency: Some(exchange.latency),
                    outcome,
                },
                checks: vec![
                    CheckResult {
                        name: status_name,
                        passed: status_ok,
                    },
                    CheckResult {
                        name: latency_name,
                        passed: latency_ok,
                    },
                ],
                status_key: exchange.status.as_u16().to_string(),
                transport_failed: false,
            }
        }
        Err(e) => IterationRecord {
            sample: Sample {
                timestamp,
                latency: None,
                outcome: Outcome::Failure,
            },
            checks: vec![
                CheckResult {
                    name: status_name,
                    passed: false,
                },
                CheckResult {
                    name: latency_name,
                    passed: false,
                },
            ],
            status_key: e.kind().to_string(),
            transport_failed: true,
        },
    }
}

/// Sends the configured request once per iteration. No retries.
pub struct HttpScenario {
    client: HttpsClient,
    request: Arc<RequestConfig>,
    checks: ChecksConfig,
    timeout: Duration,
}

impl HttpScenario {
    pub fn new(
        client: HttpsClient,
        request: RequestConfig,
        checks: ChecksConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            request: Arc::new(request),
            checks,
            timeout,
        }
    }
}

impl Scenario for HttpScenario {
    fn iteration(&self) -> impl Future<Output = IterationRecord> + Send {
        async move {
            let result = send_request(&self.client, &self.request, self.timeout).await;
            if let Err(e) = &result {
                debug!(error = %e, kind = e.kind(), "request failed");
            }
            let record = evaluate_checks(&self.checks, &result);
            debug!(
                status = %record.status_key,
                latency_ms = record.sample.latency.map(|d| d.as_secs_f64() * 1000.0),
                outcome = ?record.outcome(),
                "iteration finished"
            );
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;

    fn exchange(status: u16, latency_ms: u64) -> Result<Exchange, TransportError> {
        Ok(Exchange {
            status: StatusCode::from_u16(status).unwrap(),
            latency: Duration::from_millis(latency_ms),
        })
    }

    #[test]
    fn ok_and_fast_is_success() {
        let record = evaluate_checks(&ChecksConfig::default(), &exchange(200, 40));
        assert_eq!(record.outcome(), Outcome::Success);
        assert_eq!(record.outcome().error_indicator(), 0);
        assert!(record.checks.iter().all(|c| c.passed));
        assert_eq!(record.sample.latency, Some(Duration::from_millis(40)));
        assert_eq!(record.status_key, "200");
    }

    #[test]
    fn server_error_fails_status_check_but_keeps_latency() {
        let record = evaluate_checks(&ChecksConfig::default(), &exchange(500, 20));
        assert_eq!(record.outcome(), Outcome::Failure);
        assert_eq!(record.outcome().error_indicator(), 1);
        assert!(!record.checks[0].passed);
        assert!(record.checks[1].passed);
        assert_eq!(record.sample.latency, Some(Duration::from_millis(20)));
        assert!(!record.transport_failed);
    }

    #[test]
    fn slow_response_fails_latency_check() {
        let record = evaluate_checks(&ChecksConfig::default(), &exchange(200, 150));
        assert_eq!(record.outcome(), Outcome::Failure);
        assert!(record.checks[0].passed);
        assert!(!record.checks[1].passed);
    }

    #[test]
    fn latency_limit_is_strict() {
        let record = evaluate_checks(&ChecksConfig::default(), &exchange(200, 100));
        assert_eq!(record.outcome(), Outcome::Failure);
    }

    #[test]
    fn refused_connection_has_no_latency() {
        let result = Err(TransportError::Connect("refused".into()));
        let record = evaluate_checks(&ChecksConfig::default(), &result);
        assert_eq!(record.outcome(), Outcome::Failure);
        assert_eq!(record.sample.latency, None);
        assert!(record.transport_failed);
        assert_eq!(record.status_key, "CONNECT_ERROR");
        assert!(record.checks.iter().all(|c| !c.passed));
    }

    #[test]
    fn check_names_follow_config() {
        let names = check_names(&ChecksConfig::default());
        assert_eq!(names[0], "status is 200");
        assert_eq!(names[1], "response time < 100ms");
    }
}
