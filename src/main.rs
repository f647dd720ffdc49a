use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loadforge_runner::run_plan;

mod cli;

use cli::{Cli, Command};

/// Exit status when the run finished but a threshold failed.
const THRESHOLDS_FAILED: u8 = 99;

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so the summary on stdout stays clean.
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json)?;

    match cli.command {
        Command::Validate(args) => {
            let plan = args.resolve()?.into_plan()?;
            info!(
                name = %plan.name,
                target = %plan.target,
                stages = plan.stages.len(),
                thresholds = plan.thresholds.len(),
                "configuration is valid"
            );
            for stage in &plan.stages {
                println!("stage      {}", stage);
            }
            for threshold in &plan.thresholds {
                println!("threshold  {}", threshold);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Run(args) => {
            // Configuration errors end here, before any request is sent.
            let plan = args.config.resolve()?.into_plan()?;

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "could not listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };
            let summary = run_plan(&plan, args.report_interval(), shutdown).await;

            print!("{summary}");
            if let Some(path) = &args.summary_export {
                summary.export_json(path)?;
                info!(path = %path.display(), "summary exported");
            }

            if summary.passed {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(THRESHOLDS_FAILED))
            }
        }
    }
}
