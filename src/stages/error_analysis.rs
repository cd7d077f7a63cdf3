//! Error analysis stage: scores a test set with the registered model via
//! a batch transform job, joining predictions back onto their inputs so
//! misclassifications can be inspected offline.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::adapters::{MlPlatform, PlatformError};
use crate::domain::jobs::TransformJobRequest;
use crate::domain::payload::{sections, ConfigError, StagePayload};

use super::{wait_for_job, workspace_uri, Stage, StageContext, StageError};

/// Runs the batch scoring transform job
pub struct ErrorAnalysisStage<'a, P> {
    platform: &'a P,
}

impl<'a, P: MlPlatform> ErrorAnalysisStage<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }
}

/// Required string inside the `transform-config` subsection
fn transform_str(xform: &Value, key: &str) -> Result<String, StageError> {
    xform
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            StageError::Config(ConfigError::MissingKey {
                section: sections::ERROR_ANALYSIS.to_string(),
                key: format!("transform-config.{key}"),
            })
        })
}

/// Optional string inside `transform-config`; null and absent both mean
/// "not set"
fn transform_opt(xform: &Value, key: &str) -> Option<String> {
    xform.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Assemble the transform request from the payload sections.
///
/// The scored dataset is the configured `test_data_uri` when one is set;
/// otherwise the stage falls back to the prepared training data.
fn build_request(payload: &StagePayload) -> Result<TransformJobRequest, StageError> {
    let xform = payload.require(sections::ERROR_ANALYSIS, "transform-config")?;

    let data_uri = match payload.get_str(sections::ERROR_ANALYSIS, "test_data_uri") {
        Some(uri) if !uri.is_empty() => uri.to_string(),
        _ => payload
            .require_str(sections::AUTOML, "data_uri")?
            .to_string(),
    };

    let instance_count = xform
        .get("instance_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            StageError::Config(ConfigError::MissingKey {
                section: sections::ERROR_ANALYSIS.to_string(),
                key: "transform-config.instance_count".to_string(),
            })
        })?;

    Ok(TransformJobRequest {
        job_name: payload
            .require_str(sections::ERROR_ANALYSIS, "job_name")?
            .to_string(),
        model_name: payload.require_str(sections::MODEL, "model_name")?.to_string(),
        instance_type: transform_str(xform, "instance_type")?,
        instance_count,
        data_uri,
        output_uri: workspace_uri(
            payload,
            payload.require_str(sections::ERROR_ANALYSIS, "output_prefix")?,
        )?,
        content_type: "text/csv".to_string(),
        split_type: transform_str(xform, "split_type")?,
        strategy: transform_str(xform, "strategy")?,
        assemble_with: transform_str(xform, "assemble_with")?,
        input_filter: transform_opt(xform, "input_filter"),
        join_source: transform_opt(xform, "join_source"),
        output_filter: transform_opt(xform, "output_filter"),
    })
}

#[async_trait]
impl<P: MlPlatform> Stage for ErrorAnalysisStage<'_, P> {
    fn name(&self) -> &'static str {
        "error-analysis"
    }

    async fn run(
        &self,
        mut payload: StagePayload,
        ctx: &StageContext,
    ) -> Result<StagePayload, StageError> {
        let job_name = payload
            .require_str(sections::ERROR_ANALYSIS, "job_name")?
            .to_string();

        match self.platform.describe_transform_job(&job_name).await {
            Ok(_) => {
                debug!(job = %job_name, "transform job already exists");
            }
            Err(PlatformError::NotFound { .. }) => {
                let request = build_request(&payload)?;
                info!(job = %job_name, data_uri = %request.data_uri,
                    "submitting batch scoring job");
                self.platform.create_transform_job(&request).await?;
            }
            Err(e) => return Err(e.into()),
        }

        wait_for_job(&job_name, ctx, || {
            let fut = self.platform.describe_transform_job(&job_name);
            async move { Ok(fut.await?.status) }
        })
        .await?;

        info!(job = %job_name, "batch scoring completed");
        payload.set_job_results(
            sections::ERROR_ANALYSIS,
            json!({ "job_name": job_name, "status": "Completed" }),
        );

        Ok(payload)
    }
}
