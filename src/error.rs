//! Errors that stop a run before it starts.
//!
//! Failed requests and failed checks are not errors: they are recorded as
//! failed iterations. Only configuration problems surface here.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::threshold::ThresholdParseError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stage list is empty; at least one stage is required")]
    EmptyStages,

    #[error("stages add up to a zero-length run")]
    ZeroDuration,

    #[error("invalid stage `{0}`: expected <duration>:<target>, e.g. 10s:50")]
    InvalidStage(String),

    #[error("invalid threshold argument `{0}`: expected <metric>=<expression>, e.g. errors=rate==0")]
    InvalidThresholdArg(String),

    #[error("invalid threshold `{expression}` on `{metric}`: {source}")]
    Threshold {
        metric: String,
        expression: String,
        #[source]
        source: ThresholdParseError,
    },

    #[error("invalid target URL `{url}`: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },
}
