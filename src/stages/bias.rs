//! Bias analysis stage: runs the fairness processing job against the
//! registered model and the prepared training data.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::{split_object_uri, MlPlatform, ObjectStore, PlatformError};
use crate::domain::jobs::{AnalysisModelConfig, ProcessingJobRequest};
use crate::domain::payload::{sections, StagePayload};

use super::{csv_headers, wait_for_job, workspace_uri, Stage, StageContext, StageError};

/// Upper bound on input objects the merge workaround will concatenate
const MERGE_LIST_LIMIT: usize = 100;

/// Runs the bias analysis processing job
pub struct BiasAnalysisStage<'a, P, S> {
    platform: &'a P,
    store: &'a S,
}

impl<'a, P: MlPlatform, S: ObjectStore> BiasAnalysisStage<'a, P, S> {
    pub fn new(platform: &'a P, store: &'a S) -> Self {
        Self { platform, store }
    }
}

/// Concatenate every CSV object under `src_prefix` into a single
/// `merged.csv` under `dst_prefix`; returns the merged object's URI.
///
/// Workaround: the bias processor behaves differently when the dataset
/// is split across objects, so the stage feeds it one file. This reads
/// the whole dataset through memory and will not scale to large inputs;
/// remove once the processor handles split datasets.
async fn create_merged_dataset<S>(
    store: &S,
    src_prefix: &str,
    dst_prefix: &str,
) -> Result<String, StageError>
where
    S: ObjectStore + ?Sized,
{
    let keys = store.list_keys(src_prefix, MERGE_LIST_LIMIT).await?;
    if keys.is_empty() {
        return Err(StageError::EmptyPrefix {
            prefix: src_prefix.to_string(),
        });
    }

    let (bucket, _) = split_object_uri(src_prefix)?;

    let mut merged = String::new();
    for (index, key) in keys.iter().enumerate() {
        let body = store.get_text(&format!("s3://{bucket}/{key}")).await?;

        // Every object repeats the header row; keep only the first
        let mut lines = body.lines();
        if index > 0 {
            lines.next();
        }

        for line in lines {
            if !merged.is_empty() {
                merged.push('\n');
            }
            merged.push_str(line);
        }
    }

    let dst = format!("{dst_prefix}/merged.csv");
    store.put_text(&dst, &merged).await?;
    Ok(dst)
}

/// Assemble the bias processing request from the payload sections
fn build_request(
    payload: &StagePayload,
    data_uri: String,
    headers: Vec<String>,
) -> Result<ProcessingJobRequest, StageError> {
    let analysis = json!({
        "bias-config": payload.require(sections::BIAS, "bias-config")?.clone(),
        "prediction-config": payload.require(sections::BIAS, "prediction-config")?.clone(),
        "pre_training_methods": "all",
        "post_training_methods": "all",
    });

    Ok(ProcessingJobRequest {
        job_name: payload.require_str(sections::BIAS, "job_name")?.to_string(),
        role: payload.require_str(sections::SECURITY, "iam_role")?.to_string(),
        instance_type: payload
            .require_str(sections::BIAS, "instance_type")?
            .to_string(),
        instance_count: payload.require_u64(sections::BIAS, "instance_count")?,
        data_uri,
        output_uri: workspace_uri(
            payload,
            payload.require_str(sections::BIAS, "output_prefix")?,
        )?,
        target_attribute: payload
            .require_str(sections::AUTOML, "target_name")?
            .to_string(),
        headers,
        model: AnalysisModelConfig {
            model_name: payload.require_str(sections::MODEL, "model_name")?.to_string(),
            instance_type: payload
                .require_str(sections::MODEL, "instance_type")?
                .to_string(),
            instance_count: payload.require_u64(sections::MODEL, "instance_count")?,
            content_type: "text/csv".to_string(),
        },
        analysis,
    })
}

#[async_trait]
impl<P: MlPlatform, S: ObjectStore> Stage for BiasAnalysisStage<'_, P, S> {
    fn name(&self) -> &'static str {
        "bias-analysis"
    }

    async fn run(
        &self,
        mut payload: StagePayload,
        ctx: &StageContext,
    ) -> Result<StagePayload, StageError> {
        let job_name = payload.require_str(sections::BIAS, "job_name")?.to_string();

        match self.platform.describe_processing_job(&job_name).await {
            Ok(_) => {
                debug!(job = %job_name, "bias job already exists");
            }
            Err(PlatformError::NotFound { .. }) => {
                let train_data = payload
                    .require_str(sections::AUTOML, "data_uri")?
                    .to_string();

                let merged_dst = workspace_uri(&payload, "data/merged")?;
                warn!(dst = %merged_dst, "merging split dataset for the bias processor");
                let input_uri =
                    create_merged_dataset(self.store, &train_data, &merged_dst).await?;

                let headers = csv_headers(self.store, &train_data).await?;
                let request = build_request(&payload, input_uri, headers)?;

                info!(job = %job_name, "submitting bias analysis job");
                self.platform.create_processing_job(&request).await?;
            }
            Err(e) => return Err(e.into()),
        }

        wait_for_job(&job_name, ctx, || {
            let fut = self.platform.describe_processing_job(&job_name);
            async move { Ok(fut.await?.status) }
        })
        .await?;

        info!(job = %job_name, "bias analysis completed");
        payload.set_job_results(
            sections::BIAS,
            json!({ "job_name": job_name, "status": "Completed" }),
        );

        Ok(payload)
    }
}
