use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use loadforge_runner::models::dsl_model::{Auth, DslConfig};
use loadforge_runner::models::stage::Stage;
use loadforge_runner::models::threshold::split_threshold_arg;
use loadforge_runner::ConfigError;

/// Staged HTTP load runner
#[derive(Parser, Debug)]
#[command(name = "loadforge")]
#[command(about = "Ramp virtual users against an HTTP endpoint and check latency/error thresholds")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a load test and exit non-zero when a threshold fails
    Run(RunArgs),

    /// Parse and validate a configuration without sending requests
    Validate(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Write the end-of-run summary as JSON to this file
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Progress log interval in seconds (0 disables it)
    #[arg(long, default_value = "5")]
    pub report_interval: u64,
}

impl RunArgs {
    pub fn report_interval(&self) -> Option<Duration> {
        (self.report_interval > 0).then(|| Duration::from_secs(self.report_interval))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON run configuration
    #[arg(short, long, env = "LOADFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target URL (overrides the config file)
    #[arg(long, env = "LOADFORGE_TARGET")]
    pub target: Option<String>,

    /// Bearer token sent as `Authorization: Bearer <token>`
    #[arg(long, env = "LOADFORGE_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Stage as <duration>:<target>, repeatable; replaces configured stages
    #[arg(long = "stage", value_name = "DURATION:TARGET")]
    pub stages: Vec<Stage>,

    /// Threshold as <metric>=<expression>, repeatable; added to configured ones
    #[arg(long = "threshold", value_name = "METRIC=EXPR")]
    pub thresholds: Vec<String>,

    /// Request timeout, e.g. 5s
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Pause between iterations of one virtual user, e.g. 1s
    #[arg(long, value_parser = humantime::parse_duration)]
    pub sleep: Option<Duration>,
}

impl ConfigArgs {
    /// Loads the config file (if any) and applies command-line overrides.
    pub fn resolve(&self) -> Result<DslConfig> {
        let mut config = match &self.config {
            Some(path) => DslConfig::from_file(path)?,
            None => {
                let Some(target) = &self.target else {
                    bail!("either --config or --target is required");
                };
                let minimal = serde_json::json!({ "target": target });
                serde_json::from_value(minimal).context("building configuration from flags")?
            }
        };

        if let Some(target) = &self.target {
            config.target = target.clone();
        }
        if let Some(token) = &self.token {
            config.auth = Some(Auth::Bearer {
                token: token.clone(),
            });
        }
        if !self.stages.is_empty() {
            config.stages = self.stages.clone();
        }
        for arg in &self.thresholds {
            let (metric, expression) = split_threshold_arg(arg)
                .ok_or_else(|| ConfigError::InvalidThresholdArg(arg.clone()))?;
            config.add_threshold(metric, expression);
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(sleep) = self.sleep {
            config.sleep = Some(sleep);
        }
        Ok(config)
    }
}
