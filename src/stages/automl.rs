//! AutoML stage: runs the managed model search.
//!
//! Builds the search request from the shared payload, submits it if it
//! does not already exist, waits for it, and records the best candidate
//! plus a qualification verdict against the configured performance bar.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::adapters::{MlPlatform, ObjectStore, PlatformError};
use crate::domain::jobs::{AutoMlJobRequest, CompletionCriteria, InputDataConfig};
use crate::domain::payload::{sections, StagePayload};

use super::{resolve_data_prefix, wait_for_job, workspace_uri, Stage, StageContext, StageError};

/// Engine timeout when the config sets no explicit search runtime (24h)
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 86_400;

/// Headroom added on top of a configured search runtime
const JOB_TIMEOUT_MARGIN_SECS: u64 = 600;

/// AutoML engines this blueprint can drive.
///
/// One variant per engine, selected by a plain match on the configured
/// name; adding an engine means adding a variant and an arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMlEngine {
    Autopilot,
}

impl AutoMlEngine {
    pub const DEFAULT: AutoMlEngine = AutoMlEngine::Autopilot;

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "autopilot" => Some(Self::Autopilot),
            _ => None,
        }
    }
}

/// Drives the AutoML search job
pub struct AutoMlStage<'a, P, S> {
    platform: &'a P,
    store: &'a S,
}

impl<'a, P: MlPlatform, S: ObjectStore> AutoMlStage<'a, P, S> {
    pub fn new(platform: &'a P, store: &'a S) -> Self {
        Self { platform, store }
    }
}

/// Engine named by the payload; absent means the default engine
fn configured_engine(payload: &StagePayload) -> Result<AutoMlEngine, StageError> {
    match payload.get_str(sections::AUTOML, "engine") {
        None => Ok(AutoMlEngine::DEFAULT),
        Some(name) => {
            AutoMlEngine::from_name(name).ok_or_else(|| StageError::UnsupportedEngine {
                engine: name.to_string(),
            })
        }
    }
}

/// Assemble the search request from the payload sections
fn build_request(payload: &StagePayload) -> Result<AutoMlJobRequest, StageError> {
    let job_name = payload.require_str(sections::AUTOML, "job_name")?.to_string();
    let target = payload.require_str(sections::AUTOML, "target_name")?.to_string();
    let max_candidates = payload.require_u64(sections::AUTOML, "max_candidates")?;
    let problem_type = payload.require_str(sections::AUTOML, "problem_type")?.to_string();
    let metric = payload.require_str(sections::AUTOML, "metric_name")?.to_string();
    let role = payload.require_str(sections::SECURITY, "iam_role")?.to_string();

    // The dataprep job definition names the prefix the prepared data
    // lands under
    let data_uri = payload
        .require(sections::DATAPREP, "job-definition")?
        .pointer("/outputs/0/data_uri")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            StageError::Config(crate::domain::payload::ConfigError::MissingKey {
                section: sections::DATAPREP.to_string(),
                key: "job-definition.outputs[0].data_uri".to_string(),
            })
        })?
        .to_string();

    let max_runtime = payload
        .get(sections::AUTOML, "max_job_runtime")
        .and_then(serde_json::Value::as_u64);
    let timeout_seconds = match max_runtime {
        Some(runtime) => runtime + JOB_TIMEOUT_MARGIN_SECS,
        None => DEFAULT_JOB_TIMEOUT_SECS,
    };

    Ok(AutoMlJobRequest {
        job_name,
        inputs: vec![InputDataConfig {
            data_uri,
            target_attribute: target,
        }],
        output_uri: workspace_uri(payload, "candidates")?,
        completion: CompletionCriteria {
            max_candidates,
            max_runtime_seconds: max_runtime,
        },
        problem_type,
        objective_metric: metric,
        role,
        timeout_seconds,
    })
}

#[async_trait]
impl<P: MlPlatform, S: ObjectStore> Stage for AutoMlStage<'_, P, S> {
    fn name(&self) -> &'static str {
        "automl"
    }

    async fn run(
        &self,
        mut payload: StagePayload,
        ctx: &StageContext,
    ) -> Result<StagePayload, StageError> {
        // Engine selection happens up front so a bad config fails fast
        let engine = configured_engine(&payload)?;
        debug!(?engine, "automl engine selected");

        let job_name = payload.require_str(sections::AUTOML, "job_name")?.to_string();

        match self.platform.describe_automl_job(&job_name).await {
            Ok(_) => {
                debug!(job = %job_name, "automl job already exists");
            }
            Err(PlatformError::NotFound { .. }) => {
                let mut request = build_request(&payload)?;

                // The dataprep job writes below its configured prefix;
                // resolve the directory it actually produced
                let resolved =
                    resolve_data_prefix(self.store, &request.inputs[0].data_uri).await?;
                request.inputs[0].data_uri = resolved;

                info!(job = %job_name, data_uri = %request.inputs[0].data_uri,
                    "submitting automl job");
                self.platform.create_automl_job(&request).await?;
            }
            Err(e) => return Err(e.into()),
        }

        wait_for_job(&job_name, ctx, || {
            let fut = self.platform.describe_automl_job(&job_name);
            async move { Ok(fut.await?.status) }
        })
        .await?;

        let description = self.platform.describe_automl_job(&job_name).await?;

        let minimum = payload.require_f64(sections::AUTOML, "minimum_performance")?;
        let mut results = json!({ "job_name": job_name, "status": "Completed" });

        let mut qualified = false;
        if let Some(best) = &description.best_candidate {
            qualified = best.objective_value >= minimum;
            results["best-candidate"] = json!({
                "name": best.name,
                "objective": {
                    "name": best.objective_metric,
                    "value": best.objective_value,
                },
            });
        }
        results["qualified"] = json!(qualified);

        info!(job = %job_name, qualified, "automl job completed");

        payload.set_job_results(sections::MODEL, results);
        if let Some(input) = description.inputs.first() {
            payload.set(sections::AUTOML, "data_uri", json!(input.data_uri));
        }

        Ok(payload)
    }
}
