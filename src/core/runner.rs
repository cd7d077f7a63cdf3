//! Blueprint runner: starts executions and reads their results.
//!
//! The notebook-facing entry point. Resolves a blueprint's workflow by
//! name, starts an execution whose input points at the workspace's
//! blueprint config, optionally watches it with the progress monitor,
//! and extracts outputs from a finished execution.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::adapters::{PlatformError, WorkflowEngine};
use crate::config::default_config_uri;
use crate::domain::execution::ExecutionStatus;
use crate::domain::payload::{sections, ConfigError, StagePayload};

use super::monitor::{ExecutionMonitor, MonitorError, MonitorOutcome, ProgressSink};

/// Runner failures
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("blueprint workflow '{name}' not found")]
    WorkflowNotFound { name: String },

    #[error("execution '{execution}' must have a SUCCEEDED status, status is {status}")]
    NotSucceeded {
        execution: String,
        status: ExecutionStatus,
    },

    #[error("execution output is not a stage payload")]
    MalformedOutput,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Drives blueprint executions against a workflow engine
pub struct BlueprintRunner<W> {
    engine: W,
    workspace: String,
    monitor: ExecutionMonitor,
}

impl<W: WorkflowEngine> BlueprintRunner<W> {
    pub fn new(engine: W, workspace: impl Into<String>) -> Self {
        Self {
            engine,
            workspace: workspace.into(),
            monitor: ExecutionMonitor::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: ExecutionMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn engine(&self) -> &W {
        &self.engine
    }

    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.monitor
    }

    /// Start an execution of the named blueprint; returns its handle.
    /// The execution input carries the workspace's blueprint config URI,
    /// the sole input contract of the init stage.
    pub async fn start(&self, name: &str) -> Result<String, RunnerError> {
        let workflow_id = self
            .engine
            .find_workflow(name)
            .await?
            .ok_or_else(|| RunnerError::WorkflowNotFound {
                name: name.to_string(),
            })?;

        let input = json!({ "config_uri": default_config_uri(&self.workspace) });
        let execution_id = self.engine.start_execution(&workflow_id, &input).await?;

        info!(blueprint = name, execution = %execution_id, "execution started");
        Ok(execution_id)
    }

    /// Start an execution and watch it until `n_stages` top-level stages
    /// complete, it fails, or the monitor times out.
    pub async fn run<S: ProgressSink>(
        &self,
        name: &str,
        n_stages: usize,
        sink: &mut S,
    ) -> Result<(String, MonitorOutcome), RunnerError> {
        let execution_id = self.start(name).await?;
        let outcome = self
            .monitor
            .watch(&self.engine, &execution_id, n_stages, sink)
            .await?;

        Ok((execution_id, outcome))
    }

    /// AutoML job name recorded by a succeeded execution
    pub async fn automl_job_name(&self, execution_id: &str) -> Result<String, RunnerError> {
        let payload = self.output_payload(execution_id).await?;
        Ok(payload.require_str(sections::AUTOML, "job_name")?.to_string())
    }

    /// Name of the best model a succeeded execution registered
    pub async fn best_model_name(&self, execution_id: &str) -> Result<String, RunnerError> {
        let payload = self.output_payload(execution_id).await?;
        Ok(payload.require_str(sections::MODEL, "model_name")?.to_string())
    }

    /// Location of the prepared training data a succeeded execution used
    pub async fn prepped_data_uri(&self, execution_id: &str) -> Result<String, RunnerError> {
        let payload = self.output_payload(execution_id).await?;
        Ok(payload.require_str(sections::AUTOML, "data_uri")?.to_string())
    }

    /// Final stage payload of a succeeded execution. The engine wraps the
    /// last stage's return in a task-result envelope; unwrap it.
    async fn output_payload(&self, execution_id: &str) -> Result<StagePayload, RunnerError> {
        let status = self.engine.describe_execution(execution_id).await?;
        if status != ExecutionStatus::Succeeded {
            return Err(RunnerError::NotSucceeded {
                execution: execution_id.to_string(),
                status,
            });
        }

        let output = self.engine.execution_output(execution_id).await?;
        unwrap_task_result(output).ok_or(RunnerError::MalformedOutput)
    }
}

/// Peel the engine's task-result envelope: the output is either the
/// payload object itself, or a one-element array of `{"Payload": ...}`
/// wrappers produced by the final task state.
fn unwrap_task_result(output: Value) -> Option<StagePayload> {
    let inner = match output {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };

    let payload = match inner {
        Value::Object(ref map) if map.contains_key("Payload") => {
            map.get("Payload").cloned()?
        }
        other => other,
    };

    StagePayload::from_value(payload).ok()
}
