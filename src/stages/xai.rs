//! Explainability stage: runs the SHAP processing job against the
//! registered model.
//!
//! The SHAP baseline is sampled from the head of the prepared training
//! data; the label column is excluded since the model never sees it at
//! inference time.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::adapters::{split_object_uri, MlPlatform, ObjectStore, PlatformError};
use crate::domain::jobs::{AnalysisModelConfig, ProcessingJobRequest};
use crate::domain::payload::{sections, StagePayload};

use super::{wait_for_job, workspace_uri, Stage, StageContext, StageError};

/// Runs the SHAP explainability processing job
pub struct XaiAnalysisStage<'a, P, S> {
    platform: &'a P,
    store: &'a S,
}

impl<'a, P: MlPlatform, S: ObjectStore> XaiAnalysisStage<'a, P, S> {
    pub fn new(platform: &'a P, store: &'a S) -> Self {
        Self { platform, store }
    }
}

/// Header row plus up to `num_rows` parsed data rows from the first CSV
/// object under a prefix
async fn csv_sample<S>(
    store: &S,
    prefix_uri: &str,
    num_rows: usize,
) -> Result<(Vec<String>, Vec<Vec<Value>>), StageError>
where
    S: ObjectStore + ?Sized,
{
    let key = store
        .first_key(prefix_uri)
        .await?
        .ok_or_else(|| StageError::EmptyPrefix {
            prefix: prefix_uri.to_string(),
        })?;

    let (bucket, _) = split_object_uri(prefix_uri)?;
    let body = store.get_text(&format!("s3://{bucket}/{key}")).await?;

    let mut lines = body.lines();
    let headers: Vec<String> = lines
        .next()
        .unwrap_or_default()
        .split(',')
        .map(|column| column.trim().to_string())
        .collect();

    let rows = lines
        .take(num_rows)
        .map(|line| line.split(',').map(parse_cell).collect())
        .collect();

    Ok((headers, rows))
}

/// Cells are numbers where they parse as such, strings otherwise
fn parse_cell(cell: &str) -> Value {
    let cell = cell.trim();
    if let Ok(n) = cell.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = cell.parse::<f64>() {
        return json!(f);
    }
    json!(cell)
}

/// Assemble the explainability request: the baseline rows drop the label
/// column, the data config covers the full prepared dataset.
fn build_request(
    payload: &StagePayload,
    headers: Vec<String>,
    sample_rows: Vec<Vec<Value>>,
) -> Result<ProcessingJobRequest, StageError> {
    let shap = payload.require(sections::XAI, "shap-config")?;
    let num_samples = shap
        .get("num_samples")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            StageError::Config(crate::domain::payload::ConfigError::MissingKey {
                section: sections::XAI.to_string(),
                key: "shap-config.num_samples".to_string(),
            })
        })?;
    let agg_method = shap.get("agg_method").cloned().unwrap_or_else(|| json!("mean_abs"));

    let baseline: Vec<Vec<Value>> = sample_rows
        .into_iter()
        .map(|mut row| {
            row.pop();
            row
        })
        .collect();

    let analysis = json!({
        "shap-config": {
            "baseline": baseline,
            "num_samples": num_samples,
            "agg_method": agg_method,
        },
    });

    Ok(ProcessingJobRequest {
        job_name: payload.require_str(sections::XAI, "job_name")?.to_string(),
        role: payload.require_str(sections::SECURITY, "iam_role")?.to_string(),
        instance_type: payload
            .require_str(sections::XAI, "instance_type")?
            .to_string(),
        instance_count: payload.require_u64(sections::XAI, "instance_count")?,
        data_uri: payload
            .require_str(sections::AUTOML, "data_uri")?
            .to_string(),
        output_uri: workspace_uri(
            payload,
            payload.require_str(sections::XAI, "output_prefix")?,
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
impl<P: MlPlatform, S: ObjectStore> Stage for XaiAnalysisStage<'_, P, S> {
    fn name(&self) -> &'static str {
        "xai-analysis"
    }

    async fn run(
        &self,
        mut payload: StagePayload,
        ctx: &StageContext,
    ) -> Result<StagePayload, StageError> {
        let job_name = payload.require_str(sections::XAI, "job_name")?.to_string();

        match self.platform.describe_processing_job(&job_name).await {
            Ok(_) => {
                debug!(job = %job_name, "xai job already exists");
            }
            Err(PlatformError::NotFound { .. }) => {
                let data_uri = payload
                    .require_str(sections::AUTOML, "data_uri")?
                    .to_string();
                let num_samples = payload
                    .require(sections::XAI, "shap-config")?
                    .get("num_samples")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;

                let (headers, rows) = csv_sample(self.store, &data_uri, num_samples).await?;
                let request = build_request(&payload, headers, rows)?;

                info!(job = %job_name, "submitting explainability job");
                self.platform.create_processing_job(&request).await?;
            }
            Err(e) => return Err(e.into()),
        }

        wait_for_job(&job_name, ctx, || {
            let fut = self.platform.describe_processing_job(&job_name);
            async move { Ok(fut.await?.status) }
        })
        .await?;

        info!(job = %job_name, "explainability job completed");
        payload.set_job_results(
            sections::XAI,
            json!({ "job_name": job_name, "status": "Completed" }),
        );

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> StagePayload {
        StagePayload::from_value(json!({
            "workspace-config": { "s3_bucket": "ws", "s3_prefix": "blueprints/demo" },
            "security-config": { "iam_role": "arn:role/blueprint" },
            "automl-config": {
                "target_name": "churn",
                "data_uri": "s3://data/prepped/run-1",
            },
            "model-config": {
                "model_name": "demo-model-1",
                "instance_type": "compute.large",
                "instance_count": 1,
            },
            "xai-config": {
                "job_name": "demo-xai-1",
                "instance_type": "compute.xlarge",
                "instance_count": 1,
                "output_prefix": "analysis/xai",
                "shap-config": { "num_samples": 2, "agg_method": "mean_abs" },
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_cell_types() {
        assert_eq!(parse_cell("42"), json!(42));
        assert_eq!(parse_cell("0.5"), json!(0.5));
        assert_eq!(parse_cell(" yes "), json!("yes"));
    }

    #[test]
    fn test_baseline_drops_label_column() {
        let request = build_request(
            &payload(),
            vec!["a".into(), "b".into(), "churn".into()],
            vec![
                vec![json!(1), json!(2), json!(0)],
                vec![json!(3), json!(4), json!(1)],
            ],
        )
        .unwrap();

        assert_eq!(
            request.analysis["shap-config"]["baseline"],
            json!([[1, 2], [3, 4]])
        );
        assert_eq!(request.analysis["shap-config"]["num_samples"], 2);
        // Full dataset still feeds the analysis itself
        assert_eq!(request.data_uri, "s3://data/prepped/run-1");
        assert_eq!(request.headers, vec!["a", "b", "churn"]);
    }

    #[test]
    fn test_missing_num_samples_is_config_error() {
        let p = payload();
        let mut value = p.into_value();
        value["xai-config"]["shap-config"] = json!({ "agg_method": "mean_abs" });
        let p = StagePayload::from_value(value).unwrap();

        let err = build_request(&p, vec![], vec![]).unwrap_err();
        assert!(err.to_string().contains("num_samples"));
    }
}
