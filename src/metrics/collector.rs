//! Metrics collector: one shard per virtual user, merged on read.
//!
//! Each VU appends into its own shard, so the hot path only takes an
//! uncontended lock. Readers merge every shard into a [`MetricsSnapshot`].

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::models::metrics::{
    IterationRecord, MetricKind, CHECKS, ERRORS, HTTP_REQS, HTTP_REQ_FAILED, ITERATIONS, VUS,
};
use crate::models::threshold::Aggregation;

/// Microsecond latencies with 3 significant digits. Auto-resizing, so it
/// only grows through `record`.
fn latency_histogram() -> Histogram<u64> {
    Histogram::new(3).expect("3 significant digits is a valid histogram precision")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}

struct Shard {
    durations: Histogram<u64>,
    /// Trend entries without a numeric latency (transport failures).
    absent_durations: u64,
    iterations: u64,
    failures: u64,
    transport_failures: u64,
    checks: BTreeMap<String, CheckCounts>,
    statuses: BTreeMap<String, u64>,
}

impl Shard {
    fn new() -> Self {
        Self {
            durations: latency_histogram(),
            absent_durations: 0,
            iterations: 0,
            failures: 0,
            transport_failures: 0,
            checks: BTreeMap::new(),
            statuses: BTreeMap::new(),
        }
    }

    fn record(&mut self, record: &IterationRecord) {
        match record.sample.latency {
            Some(latency) => {
                let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
                // `record` grows the histogram; only values past its hard
                // limit fall back to clamping.
                if self.durations.record(micros).is_err() {
                    self.durations.saturating_record(micros);
                }
            }
            None => self.absent_durations += 1,
        }

        self.iterations += 1;
        self.failures += record.outcome().error_indicator();
        if record.transport_failed {
            self.transport_failures += 1;
        }

        for check in &record.checks {
            let counts = self.checks.entry(check.name.clone()).or_default();
            if check.passed {
                counts.passes += 1;
            } else {
                counts.fails += 1;
            }
        }
        *self.statuses.entry(record.status_key.clone()).or_insert(0) += 1;
    }
}

/// Write handle owned by one virtual user.
#[derive(Clone)]
pub struct ShardHandle(Arc<Mutex<Shard>>);

impl ShardHandle {
    /// Appends exactly one trend entry and one rate entry for the iteration.
    pub fn record(&self, record: &IterationRecord) {
        self.0.lock().record(record);
    }
}

#[derive(Clone)]
pub struct MetricsCollector {
    shards: Arc<Mutex<Vec<Arc<Mutex<Shard>>>>>,
    vus: Arc<AtomicU64>,
    vus_max: Arc<AtomicU64>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            shards: Arc::new(Mutex::new(Vec::new())),
            vus: Arc::new(AtomicU64::new(0)),
            vus_max: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Registers a new shard for a virtual user.
    pub fn shard(&self) -> ShardHandle {
        let shard = Arc::new(Mutex::new(Shard::new()));
        self.shards.lock().push(Arc::clone(&shard));
        ShardHandle(shard)
    }

    pub fn vu_started(&self) {
        let active = self.vus.fetch_add(1, Ordering::AcqRel) + 1;
        self.vus_max.fetch_max(active, Ordering::AcqRel);
    }

    pub fn vu_stopped(&self) {
        let _ = self
            .vus
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }

    pub fn active_vus(&self) -> u64 {
        self.vus.load(Ordering::Acquire)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Merges every shard into one consistent view.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let shards: Vec<_> = self.shards.lock().iter().cloned().collect();

        let mut snapshot = MetricsSnapshot {
            durations: latency_histogram(),
            absent_durations: 0,
            iterations: 0,
            failures: 0,
            transport_failures: 0,
            checks: BTreeMap::new(),
            statuses: BTreeMap::new(),
            vus: self.active_vus(),
            vus_max: self.vus_max.load(Ordering::Acquire),
            elapsed: self.elapsed(),
        };

        for shard in shards {
            let shard = shard.lock();
            if let Err(e) = snapshot.durations.add(&shard.durations) {
                warn!(error = %e, "could not merge latency histogram shard");
            }
            snapshot.absent_durations += shard.absent_durations;
            snapshot.iterations += shard.iterations;
            snapshot.failures += shard.failures;
            snapshot.transport_failures += shard.transport_failures;
            for (name, counts) in &shard.checks {
                let merged = snapshot.checks.entry(name.clone()).or_default();
                merged.passes += counts.passes;
                merged.fails += counts.fails;
            }
            for (status, count) in &shard.statuses {
                *snapshot.statuses.entry(status.clone()).or_insert(0) += count;
            }
        }

        snapshot
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TrendStats {
    pub count: u64,
    /// Entries without a latency value.
    pub absent: u64,
    pub min: f64,
    pub avg: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

/// Point-in-time merge of all shards.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    durations: Histogram<u64>,
    pub absent_durations: u64,
    pub iterations: u64,
    pub failures: u64,
    pub transport_failures: u64,
    pub checks: BTreeMap<String, CheckCounts>,
    pub statuses: BTreeMap<String, u64>,
    pub vus: u64,
    pub vus_max: u64,
    pub elapsed: Duration,
}

fn micros_to_ms(value: u64) -> f64 {
    value as f64 / 1000.0
}

impl MetricsSnapshot {
    /// Latency samples with a numeric value.
    pub fn latency_count(&self) -> u64 {
        self.durations.len()
    }

    pub fn percentile_ms(&self, percentile: f64) -> Option<f64> {
        if self.durations.is_empty() {
            return None;
        }
        Some(self.read_ms(self.durations.value_at_percentile(percentile)))
    }

    /// Bucket values read back as the bucket's lower edge, so a latency
    /// below a limit never reads as above it.
    fn read_ms(&self, value: u64) -> f64 {
        micros_to_ms(self.durations.lowest_equivalent(value))
    }

    pub fn trend(&self) -> Option<TrendStats> {
        if self.durations.is_empty() {
            return None;
        }
        let h = &self.durations;
        Some(TrendStats {
            count: h.len(),
            absent: self.absent_durations,
            min: self.read_ms(h.min()),
            avg: h.mean() / 1000.0,
            med: self.read_ms(h.value_at_quantile(0.50)),
            p90: self.read_ms(h.value_at_quantile(0.90)),
            p95: self.read_ms(h.value_at_quantile(0.95)),
            p99: self.read_ms(h.value_at_quantile(0.99)),
            max: self.read_ms(h.max()),
        })
    }

    /// Failed iterations over all iterations; `None` before the first one.
    pub fn error_rate(&self) -> Option<f64> {
        ratio(self.failures, self.iterations)
    }

    pub fn transport_failure_rate(&self) -> Option<f64> {
        ratio(self.transport_failures, self.iterations)
    }

    /// Passed check evaluations over all check evaluations.
    pub fn checks_rate(&self) -> Option<f64> {
        let (passes, total) = self
            .checks
            .values()
            .fold((0, 0), |(p, t), c| (p + c.passes, t + c.passes + c.fails));
        ratio(passes, total)
    }

    /// Aggregated value of a named metric, `None` when it has no data yet.
    pub fn value(&self, metric: &str, aggregation: Aggregation) -> Option<f64> {
        let kind = MetricKind::of(metric)?;
        match (kind, aggregation) {
            (MetricKind::Trend, Aggregation::Count) => {
                Some((self.latency_count() + self.absent_durations) as f64)
            }
            (MetricKind::Trend, Aggregation::Percentile(p)) => self.percentile_ms(p),
            (MetricKind::Trend, Aggregation::Med) => self.percentile_ms(50.0),
            (MetricKind::Trend, Aggregation::Avg) => self.trend().map(|t| t.avg),
            (MetricKind::Trend, Aggregation::Min) => self.trend().map(|t| t.min),
            (MetricKind::Trend, Aggregation::Max) => self.trend().map(|t| t.max),
            (MetricKind::Rate, Aggregation::Rate) => match metric {
                ERRORS => self.error_rate(),
                CHECKS => self.checks_rate(),
                HTTP_REQ_FAILED => self.transport_failure_rate(),
                _ => None,
            },
            (MetricKind::Counter, Aggregation::Count) => Some(self.counter(metric) as f64),
            (MetricKind::Counter, Aggregation::Rate) => {
                let secs = self.elapsed.as_secs_f64();
                (secs > 0.0).then(|| self.counter(metric) as f64 / secs)
            }
            (MetricKind::Gauge, Aggregation::Value) => match metric {
                VUS => Some(self.vus as f64),
                _ => Some(self.vus_max as f64),
            },
            (MetricKind::Gauge, Aggregation::Max) => Some(self.vus_max as f64),
            _ => None,
        }
    }

    fn counter(&self, metric: &str) -> u64 {
        match metric {
            // Every iteration issues exactly one request.
            HTTP_REQS | ITERATIONS => self.iterations,
            _ => 0,
        }
    }
}

fn ratio(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}
