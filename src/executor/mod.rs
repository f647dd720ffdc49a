//! Virtual-user scheduler.
//!
//! A control loop ticks at a fixed interval, computes the interpolated
//! concurrency target and spawns or retires virtual users to match it.
//! Retiring never interrupts a request: the VU finishes its current iteration
//! and then exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::collector::{MetricsCollector, MetricsSnapshot, ShardHandle};
use crate::models::dsl_model::RunPlan;
use crate::models::stage::{self, Stage};
use crate::models::threshold::Threshold;
use crate::scenario::Scenario;
use crate::thresholds::{self, ThresholdResult};

const DEFAULT_TICK: Duration = Duration::from_millis(100);
const ABORT_EVAL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub stages: Vec<Stage>,
    pub sleep: Option<Duration>,
    pub graceful_stop: Duration,
    /// Only thresholds with `abort_on_fail` are looked at during the run.
    pub thresholds: Vec<Threshold>,
    pub tick: Duration,
}

impl ScheduleOptions {
    pub fn from_plan(plan: &RunPlan) -> Self {
        Self {
            stages: plan.stages.clone(),
            sleep: plan.sleep,
            graceful_stop: plan.graceful_stop,
            thresholds: plan.thresholds.clone(),
            tick: DEFAULT_TICK,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The last stage ran out.
    Completed,
    /// An `abortOnFail` threshold was breached mid-run.
    ThresholdBreached(ThresholdResult),
    Interrupted,
}

#[derive(Debug)]
pub struct RunOutcome {
    /// Taken after every VU has stopped.
    pub snapshot: MetricsSnapshot,
    pub stop_reason: StopReason,
    /// VUs still mid-iteration when the graceful stop ran out.
    pub abandoned_vus: usize,
}

struct VirtualUser {
    id: u64,
    retire: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Keeps the `vus` gauge right even when a VU task is aborted.
struct VuGuard(MetricsCollector);

impl Drop for VuGuard {
    fn drop(&mut self) {
        self.0.vu_stopped();
    }
}

async fn vu_loop<S: Scenario>(
    id: u64,
    scenario: Arc<S>,
    shard: ShardHandle,
    mut retire: watch::Receiver<bool>,
    sleep: Option<Duration>,
    _guard: VuGuard,
) {
    debug!(vu = id, "virtual user started");
    let mut iterations = 0u64;
    while !*retire.borrow() {
        let record = scenario.iteration().await;
        shard.record(&record);
        iterations += 1;

        if let Some(pause) = sleep {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = retire.changed() => {}
            }
        }
    }
    debug!(vu = id, iterations, "virtual user retired");
}

struct Pool<S: Scenario> {
    scenario: Arc<S>,
    collector: MetricsCollector,
    sleep: Option<Duration>,
    active: Vec<VirtualUser>,
    retiring: Vec<VirtualUser>,
    next_id: u64,
}

impl<S: Scenario> Pool<S> {
    /// Moves the running VU count toward `target`. VUs still finishing
    /// their last iteration are revived before any new one is spawned, so
    /// running VUs never exceed the target on a dip and rise.
    fn scale_to(&mut self, target: usize) {
        self.active.retain(|vu| !vu.handle.is_finished());
        self.retiring.retain(|vu| !vu.handle.is_finished());

        while self.active.len() < target {
            match self.retiring.pop() {
                Some(vu) => {
                    let _ = vu.retire.send(false);
                    debug!(vu = vu.id, "reviving virtual user");
                    self.active.push(vu);
                }
                None => self.spawn(),
            }
        }
        while self.active.len() > target {
            if let Some(vu) = self.active.pop() {
                let _ = vu.retire.send(true);
                debug!(vu = vu.id, "retiring virtual user");
                self.retiring.push(vu);
            }
        }
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (retire, retire_rx) = watch::channel(false);
        self.collector.vu_started();
        let guard = VuGuard(self.collector.clone());
        let handle = tokio::spawn(vu_loop(
            id,
            Arc::clone(&self.scenario),
            self.collector.shard(),
            retire_rx,
            self.sleep,
            guard,
        ));
        self.active.push(VirtualUser { id, retire, handle });
    }

    /// Retires every VU and waits for in-flight iterations until `graceful_stop`.
    async fn drain(mut self, graceful_stop: Duration) -> usize {
        for vu in &self.active {
            let _ = vu.retire.send(true);
        }
        let mut pending = std::mem::take(&mut self.retiring);
        pending.append(&mut self.active);
        info!(vus = pending.len(), "waiting for in-flight iterations");

        let deadline = Instant::now() + graceful_stop;
        let mut abandoned = 0;
        for mut vu in pending {
            match timeout_at(deadline, &mut vu.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(vu = vu.id, error = %e, "virtual user task failed"),
                Err(_) => {
                    vu.handle.abort();
                    // Wait for the cancelled task to drop its state.
                    let _ = (&mut vu.handle).await;
                    abandoned += 1;
                }
            }
        }
        if abandoned > 0 {
            warn!(
                abandoned,
                graceful_stop = %humantime::format_duration(graceful_stop),
                "graceful stop expired, abandoned in-flight iterations"
            );
        }
        abandoned
    }
}

/// Runs the staged load until the profile ends, a fail-fast threshold is
/// breached or `shutdown` resolves. The returned snapshot is taken after all
/// virtual users have stopped writing.
pub async fn run_load_test<S, F>(
    scenario: Arc<S>,
    options: &ScheduleOptions,
    collector: MetricsCollector,
    shutdown: F,
) -> RunOutcome
where
    S: Scenario,
    F: Future<Output = ()>,
{
    let total = stage::total_duration(&options.stages);
    let fail_fast = options.thresholds.iter().any(|t| t.abort_on_fail);

    let mut pool = Pool {
        scenario,
        collector: collector.clone(),
        sleep: options.sleep,
        active: Vec::new(),
        retiring: Vec::new(),
        next_id: 1,
    };

    let start = Instant::now();
    let mut ticker = interval(options.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut current_stage = None;
    let mut last_abort_eval = start;
    tokio::pin!(shutdown);

    let stop_reason = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("interrupted, stopping virtual users");
                break StopReason::Interrupted;
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= total {
            break StopReason::Completed;
        }

        let index = stage::stage_index_at(&options.stages, elapsed);
        if index != current_stage {
            if let Some(i) = index {
                let s = &options.stages[i];
                info!(
                    stage = i + 1,
                    of = options.stages.len(),
                    target = s.target,
                    duration = %humantime::format_duration(s.duration),
                    "entering stage"
                );
            }
            current_stage = index;
        }

        let target = stage::target_at(&options.stages, elapsed);
        pool.scale_to(usize::try_from(target).unwrap_or(usize::MAX));

        if fail_fast && last_abort_eval.elapsed() >= ABORT_EVAL_INTERVAL {
            last_abort_eval = Instant::now();
            let snapshot = collector.snapshot();
            if let Some(breach) = thresholds::abort_breach(&options.thresholds, &snapshot, elapsed) {
                warn!(
                    metric = %breach.metric,
                    expression = %breach.expression,
                    observed = ?breach.observed,
                    "threshold breached, aborting run"
                );
                break StopReason::ThresholdBreached(breach);
            }
        }
    };

    let abandoned_vus = pool.drain(options.graceful_stop).await;

    RunOutcome {
        snapshot: collector.snapshot(),
        stop_reason,
        abandoned_vus,
    }
}
