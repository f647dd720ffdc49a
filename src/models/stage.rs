//! Staged ramp profile for virtual users.
//!
//! Stages form a piecewise-linear curve: each stage moves the concurrency
//! target from the previous stage's target (0 for the first stage) to its own
//! target over its duration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "crate::models::dsl_model::duration")]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} VUs",
            humantime::format_duration(self.duration),
            self.target
        )
    }
}

/// Parses the CLI form `<duration>:<target>`, e.g. `10s:50`.
impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidStage(s.to_string()))?;
        let duration = humantime::parse_duration(duration.trim())
            .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;
        let target = target
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidStage(s.to_string()))?;
        Ok(Self { duration, target })
    }
}

pub fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|s| s.duration).sum()
}

pub fn max_target(stages: &[Stage]) -> u64 {
    stages.iter().map(|s| s.target).max().unwrap_or(0)
}

/// Interpolated concurrency target at `elapsed` since the run started.
///
/// Returns 0 at `elapsed == 0`, even when leading stages have zero length,
/// and the last stage's target once the profile has run out. Values in
/// between are floored, so the result never exceeds either endpoint of the
/// segment it falls in.
pub fn target_at(stages: &[Stage], elapsed: Duration) -> u64 {
    if elapsed.is_zero() {
        return 0;
    }
    let mut stage_start = Duration::ZERO;
    let mut prev_target = 0u64;
    for stage in stages {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
            let from = prev_target as f64;
            let to = stage.target as f64;
            let value = from + (to - from) * progress;
            return value.floor().clamp(0.0, from.max(to)) as u64;
        }
        stage_start = stage_end;
        prev_target = stage.target;
    }
    prev_target
}

/// Index of the stage active at `elapsed`, `None` once the profile is over.
pub fn stage_index_at(stages: &[Stage], elapsed: Duration) -> Option<usize> {
    let mut stage_end = Duration::ZERO;
    for (index, stage) in stages.iter().enumerate() {
        stage_end += stage.duration;
        if elapsed < stage_end {
            return Some(index);
        }
    }
    None
}
