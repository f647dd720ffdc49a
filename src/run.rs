//! Wires a validated plan into a full run: client, scenario, scheduler,
//! threshold evaluation and summary.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::client::build_client;
use crate::executor::{run_load_test, ScheduleOptions};
use crate::metrics::collector::MetricsCollector;
use crate::metrics::reporter::{start_periodic_reporter, Summary};
use crate::models::dsl_model::RunPlan;
use crate::scenario::HttpScenario;
use crate::thresholds;
use crate::utils::hardware::get_hardware_info;

pub async fn run_plan<F>(plan: &RunPlan, report_interval: Option<Duration>, shutdown: F) -> Summary
where
    F: Future<Output = ()>,
{
    info!(
        name = %plan.name,
        target = %plan.target,
        stages = plan.stages.len(),
        max_vus = plan.max_vus(),
        duration = %humantime::format_duration(plan.total_duration()),
        thresholds = plan.thresholds.len(),
        "starting load test"
    );

    let scenario = Arc::new(HttpScenario::new(
        build_client(),
        plan.request.clone(),
        plan.checks.clone(),
        plan.timeout,
    ));
    let collector = MetricsCollector::new();

    let reporter = report_interval
        .filter(|every| !every.is_zero())
        .map(|every| tokio::spawn(start_periodic_reporter(collector.clone(), every)));

    let options = ScheduleOptions::from_plan(plan);
    let outcome = run_load_test(scenario, &options, collector, shutdown).await;

    if let Some(reporter) = reporter {
        reporter.abort();
    }

    // Every VU has joined; the snapshot is final.
    let report = thresholds::evaluate(&plan.thresholds, &outcome.snapshot);
    let summary = Summary::new(plan, &outcome, report, get_hardware_info());
    info!(
        iterations = summary.iterations,
        passed = summary.passed,
        stop_reason = %summary.stop_reason,
        "load test finished"
    );
    summary
}
