//! Staged HTTP load runner.
//!
//! Virtual users repeat one authenticated request against a target endpoint
//! while the scheduler ramps their number along a staged profile. Latency and
//! outcome samples are aggregated per VU and merged at the end, where
//! thresholds such as `p(95)<100` or `rate==0` decide whether the run passed.

pub mod client;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod run;
pub mod scenario;
pub mod thresholds;
pub mod utils;

pub use error::ConfigError;
pub use models::dsl_model::{DslConfig, RunPlan};
pub use run::run_plan;
