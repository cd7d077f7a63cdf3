//! Command-line interface for autoflow.
//!
//! Provides commands for starting blueprint executions, watching their
//! progress, and reading results out of finished executions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::PlatformClient;
use crate::config::{load_settings, Settings};
use crate::core::monitor::{ExecutionMonitor, MonitorOutcome, TraceSink};
use crate::core::runner::BlueprintRunner;

/// autoflow - AutoML blueprint orchestrator
#[derive(Parser, Debug)]
#[command(name = "autoflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a blueprint execution
    Run {
        /// Blueprint (workflow) name
        blueprint: String,

        /// Top-level stages the blueprint completes
        #[arg(short = 'n', long, default_value = "5")]
        stages: usize,

        /// Wait for completion, reporting stage progress
        #[arg(long)]
        wait: bool,
    },

    /// Watch a running execution until it completes
    Watch {
        /// Execution handle
        execution: String,

        /// Top-level stages the blueprint completes
        #[arg(short = 'n', long, default_value = "5")]
        stages: usize,
    },

    /// Show an execution's status
    Status {
        /// Execution handle
        execution: String,
    },

    /// Print the model name a succeeded execution registered
    BestModel {
        /// Execution handle
        execution: String,
    },

    /// Print the AutoML job name a succeeded execution ran
    JobName {
        /// Execution handle
        execution: String,
    },

    /// Print the prepared training data location of a succeeded execution
    DataUri {
        /// Execution handle
        execution: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let settings = load_settings()?;
        let runner = build_runner(&settings);

        match self.command {
            Commands::Run {
                blueprint,
                stages,
                wait,
            } => run_blueprint(&runner, &blueprint, stages, wait).await,
            Commands::Watch { execution, stages } => watch_execution(&runner, &execution, stages).await,
            Commands::Status { execution } => show_status(&runner, &execution).await,
            Commands::BestModel { execution } => {
                let model = runner.best_model_name(&execution).await?;
                println!("{model}");
                Ok(())
            }
            Commands::JobName { execution } => {
                let job = runner.automl_job_name(&execution).await?;
                println!("{job}");
                Ok(())
            }
            Commands::DataUri { execution } => {
                let uri = runner.prepped_data_uri(&execution).await?;
                println!("{uri}");
                Ok(())
            }
            Commands::Config => show_config(&settings),
        }
    }
}

fn build_runner(settings: &Settings) -> BlueprintRunner<PlatformClient> {
    let monitor = ExecutionMonitor::new()
        .with_poll_interval(settings.monitor.poll_interval)
        .with_timeout(settings.monitor.timeout)
        .with_page_size(settings.monitor.page_size);

    BlueprintRunner::new(PlatformClient::new(&settings.endpoint), &settings.workspace)
        .with_monitor(monitor)
}

/// Start a blueprint execution, optionally waiting for it
async fn run_blueprint(
    runner: &BlueprintRunner<PlatformClient>,
    blueprint: &str,
    stages: usize,
    wait: bool,
) -> Result<()> {
    if !wait {
        let execution = runner.start(blueprint).await?;
        println!("{execution}");
        return Ok(());
    }

    let mut sink = TraceSink;
    let (execution, outcome) = runner.run(blueprint, stages, &mut sink).await?;
    report_outcome(&execution, outcome)
}

/// Watch an already-running execution
async fn watch_execution(
    runner: &BlueprintRunner<PlatformClient>,
    execution: &str,
    stages: usize,
) -> Result<()> {
    let monitor = runner.monitor();
    let mut sink = TraceSink;
    let outcome = monitor
        .watch(runner.engine(), execution, stages, &mut sink)
        .await?;

    report_outcome(execution, outcome)
}

fn report_outcome(execution: &str, outcome: MonitorOutcome) -> Result<()> {
    match outcome {
        MonitorOutcome::Completed { stages } => {
            eprintln!("[Execution {execution} completed {stages} stages]");
            Ok(())
        }
        MonitorOutcome::TimedOut { elapsed } => {
            anyhow::bail!(
                "execution {execution} still running after {elapsed:?}; \
                 re-attach with `autoflow watch {execution}`"
            )
        }
    }
}

/// Show the status of an execution
async fn show_status(
    runner: &BlueprintRunner<PlatformClient>,
    execution: &str,
) -> Result<()> {
    use crate::adapters::WorkflowEngine;

    let status = runner
        .engine()
        .describe_execution(execution)
        .await
        .with_context(|| format!("Failed to describe execution: {execution}"))?;

    println!("Execution: {execution}");
    println!("Status: {status}");
    Ok(())
}

/// Show the resolved configuration
fn show_config(settings: &Settings) -> Result<()> {
    println!("Endpoint: {}", settings.endpoint);
    println!("Workspace: {}", settings.workspace);
    println!(
        "Monitor: poll every {:?}, timeout {:?}, page size {}",
        settings.monitor.poll_interval, settings.monitor.timeout, settings.monitor.page_size
    );
    match &settings.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found)"),
    }
    Ok(())
}
