//! Progress logging during the run and the end-of-run summary.

use chrono::Local;
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::collector::{CheckCounts, MetricsCollector, TrendStats};
use crate::executor::{RunOutcome, StopReason};
use crate::models::dsl_model::RunPlan;
use crate::thresholds::ThresholdReport;
use crate::utils::hardware::HostInfo;

/// Logs a progress line every `every` until the task is dropped or aborted.
pub async fn start_periodic_reporter(collector: MetricsCollector, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing to report yet.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let snapshot = collector.snapshot();
        info!(
            elapsed = %humantime::format_duration(Duration::from_secs(snapshot.elapsed.as_secs())),
            vus = snapshot.vus,
            iterations = snapshot.iterations,
            error_rate = snapshot.error_rate().unwrap_or(0.0),
            p95_ms = snapshot.percentile_ms(95.0).unwrap_or(0.0),
            "progress"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Everything the run reports, for the console and for `--summary-export`.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub name: String,
    pub target: String,
    pub method: String,
    pub timestamp: String,
    pub duration_secs: f64,
    pub stop_reason: String,
    pub vus_max: u64,
    pub iterations: u64,
    pub http_reqs: u64,
    pub throughput: f64,
    pub http_req_duration: Option<TrendStats>,
    pub error_rate: Option<f64>,
    pub http_req_failed: Option<f64>,
    pub checks: Vec<CheckSummary>,
    pub status_counts: BTreeMap<String, u64>,
    pub abandoned_vus: usize,
    pub thresholds: ThresholdReport,
    pub host: HostInfo,
    pub passed: bool,
}

impl Summary {
    pub fn new(
        plan: &RunPlan,
        outcome: &RunOutcome,
        thresholds: ThresholdReport,
        host: HostInfo,
    ) -> Self {
        let snapshot = &outcome.snapshot;
        let secs = snapshot.elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            snapshot.iterations as f64 / secs
        } else {
            0.0
        };
        let stop_reason = match &outcome.stop_reason {
            StopReason::Completed => "completed".to_string(),
            StopReason::Interrupted => "interrupted".to_string(),
            StopReason::ThresholdBreached(breach) => {
                format!("aborted: {} {}", breach.metric, breach.expression)
            }
        };
        // An aborted run fails even if the final values recovered.
        let passed = thresholds.passed()
            && !matches!(outcome.stop_reason, StopReason::ThresholdBreached(_));

        Self {
            name: plan.name.clone(),
            target: plan.target.clone(),
            method: plan.request.method.to_string(),
            timestamp: Local::now().format("%Y/%m/%d %H:%M:%S").to_string(),
            duration_secs: secs,
            stop_reason,
            vus_max: snapshot.vus_max,
            iterations: snapshot.iterations,
            http_reqs: snapshot.iterations,
            throughput,
            http_req_duration: snapshot.trend(),
            error_rate: snapshot.error_rate(),
            http_req_failed: snapshot.transport_failure_rate(),
            checks: snapshot
                .checks
                .iter()
                .map(|(name, CheckCounts { passes, fails })| CheckSummary {
                    name: name.clone(),
                    passes: *passes,
                    fails: *fails,
                })
                .collect(),
            status_counts: snapshot.statuses.clone(),
            abandoned_vus: outcome.abandoned_vus,
            thresholds,
            host,
            passed,
        }
    }

    pub fn export_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

fn fmt_ms(value: f64) -> String {
    format!("{:.2}ms", value)
}

fn fmt_rate(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or_else(|| "n/a".to_string())
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = |title: &str| format!(" ======== {title} ======== ").bold().white().on_blue();

        writeln!(f)?;
        writeln!(f, "{}", header("TEST RESULTS"))?;
        writeln!(f, "{} {}", "Scenario                 :".bold().blue(), self.name.bold())?;
        writeln!(
            f,
            "{} {} {}",
            "Target                   :".bold().blue(),
            self.method.bold(),
            self.target.bold()
        )?;
        writeln!(f, "{} {}", "Timestamp                :".bold().blue(), self.timestamp.bold())?;
        writeln!(
            f,
            "{} {} cores, {} / {} MB free",
            "Load generator           :".bold().blue(),
            self.host.cpu_cores,
            self.host.available_memory_mb,
            self.host.total_memory_mb
        )?;
        writeln!(
            f,
            "{} {:.1}s ({})",
            "Duration                 :".bold().blue(),
            self.duration_secs,
            self.stop_reason
        )?;
        writeln!(f, "{} {}", "Peak VUs                 :".bold().blue(), self.vus_max)?;
        writeln!(f, "{} {}", "Iterations               :".bold().green(), self.iterations)?;
        writeln!(f, "{} {:.2}", "Requests per second (RPS):".bold().blue(), self.throughput)?;
        writeln!(f, "{} {}", "Error rate               :".bold().red(), fmt_rate(self.error_rate))?;
        writeln!(
            f,
            "{} {}",
            "Transport failures       :".bold().red(),
            fmt_rate(self.http_req_failed)
        )?;
        if self.abandoned_vus > 0 {
            writeln!(f, "{} {}", "Abandoned VUs            :".bold().yellow(), self.abandoned_vus)?;
        }

        writeln!(f)?;
        writeln!(f, "{}", header("LATENCY (http_req_duration)"))?;
        match &self.http_req_duration {
            Some(t) => {
                writeln!(
                    f,
                    "avg={} min={} med={} p(90)={} p(95)={} p(99)={} max={}",
                    fmt_ms(t.avg),
                    fmt_ms(t.min),
                    fmt_ms(t.med),
                    fmt_ms(t.p90),
                    fmt_ms(t.p95),
                    fmt_ms(t.p99),
                    fmt_ms(t.max)
                )?;
                writeln!(f, "samples={} without response={}", t.count, t.absent)?;
            }
            None => writeln!(f, "no responses received")?,
        }

        if !self.checks.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", header("CHECKS"))?;
            for check in &self.checks {
                let mark = if check.fails == 0 {
                    "✓".green().bold()
                } else {
                    "✗".red().bold()
                };
                writeln!(f, "{} {}  ✓ {} / ✗ {}", mark, check.name, check.passes, check.fails)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "{}", header("STATUS BREAKDOWN"))?;
        for (status, count) in &self.status_counts {
            writeln!(f, "• {}: {}", status, count)?;
        }

        writeln!(f)?;
        writeln!(f, "{}", header("THRESHOLDS"))?;
        if self.thresholds.results.is_empty() {
            writeln!(f, "none configured")?;
        }
        for result in &self.thresholds.results {
            let mark = if result.passed {
                "PASS".green().bold()
            } else {
                "FAIL".red().bold()
            };
            let observed = result
                .observed
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "no data".to_string());
            writeln!(
                f,
                "{} {} {} (observed {})",
                mark, result.metric, result.expression, observed
            )?;
        }

        writeln!(f)?;
        let verdict = if self.passed {
            " RESULT: PASS ".bold().white().on_green()
        } else {
            " RESULT: FAIL ".bold().white().on_red()
        };
        writeln!(f, "{}", verdict)
    }
}
