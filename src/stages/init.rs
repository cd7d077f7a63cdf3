//! Init stage: resolves the blueprint config into the run's payload.
//!
//! Fetches the blueprint config document from the workspace, fills the
//! defaults the execution input provides (workspace bucket, execution
//! role), stamps timestamped resource names for every downstream job,
//! assembles the dataprep processing-job definition from the stored flow
//! document, and persists the resolved config back so the run is
//! reproducible.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::adapters::ObjectStore;
use crate::domain::payload::{sections, StagePayload};

use super::StageError;

/// Key under which the dataprep job definition is stored
const JOB_DEFINITION_KEY: &str = "job-definition";

/// Execution input the init stage starts from
#[derive(Debug, Clone)]
pub struct InitInputs {
    /// Object-store URI of the blueprint config document
    pub config_uri: String,

    /// Bucket used when the config names no workspace bucket
    pub default_workspace: String,

    /// Execution role used when the config names none
    pub default_role: String,
}

/// Builds the shared payload every later stage consumes
pub struct InitStage<'a, S> {
    store: &'a S,
}

impl<'a, S: ObjectStore> InitStage<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Resolve the blueprint config into a run payload
    pub async fn initialize(&self, inputs: &InitInputs) -> Result<StagePayload, StageError> {
        let raw = self.store.get_json(&inputs.config_uri).await?;
        let mut payload = StagePayload::from_value(raw)
            .map_err(StageError::Config)?;

        apply_defaults(&mut payload, inputs);
        stamp_resource_names(&mut payload)?;

        let job_def = self.dataprep_job_definition(&payload).await?;
        payload.set(sections::DATAPREP, JOB_DEFINITION_KEY, job_def);

        // Persist the resolved config so the run's exact names survive it
        self.store
            .put_json(&inputs.config_uri, &payload.clone().into_value())
            .await?;

        info!(config_uri = %inputs.config_uri, "blueprint config resolved");
        Ok(payload)
    }

    /// Assemble the dataprep processing-job definition: load the flow
    /// document, point its dataset source at the raw input data, and
    /// build the job request around it with a unique output prefix.
    async fn dataprep_job_definition(
        &self,
        payload: &StagePayload,
    ) -> Result<Value, StageError> {
        let ws_bucket = payload.require_str(sections::WORKSPACE, "s3_bucket")?;
        let ws_prefix = payload.require_str(sections::WORKSPACE, "s3_prefix")?;
        let role = payload.require_str(sections::SECURITY, "iam_role")?;

        let data_bucket = payload.require_str(sections::DATA, "s3_bucket")?;
        let raw_prefix = payload.require_str(sections::DATA, "raw_in_prefix")?;
        let prepped_prefix = payload.require_str(sections::DATA, "prepped_out_prefix")?;

        let flow_name = payload.require_str(sections::DATAPREP, "definition_file")?;
        let output_node = payload.require_str(sections::DATAPREP, "output_node_id")?;
        let instance_type = payload.require_str(sections::DATAPREP, "instance_type")?;
        let instance_count = payload.require_u64(sections::DATAPREP, "instance_count")?;
        let container_image = payload.require_str(sections::DATAPREP, "container_image")?;

        let flow_uri = format!("s3://{ws_bucket}/{ws_prefix}/meta/{flow_name}");
        let mut flow = self.store.get_json(&flow_uri).await?;

        let raw_data_uri = format!("s3://{data_bucket}/{raw_prefix}/");
        retarget_flow_source(&mut flow, &raw_data_uri)?;
        self.store.put_json(&flow_uri, &flow).await?;

        // Unique output prefix per run: the producing job appends opaque
        // child directories, so downstream stages resolve the real path
        // under a prefix nothing else writes to
        let guid = format!(
            "{}-{}",
            Utc::now().format("%d-%H-%M-%S"),
            &Uuid::new_v4().to_string()[..8]
        );
        let output_uri = format!("s3://{data_bucket}/{prepped_prefix}/{guid}");

        Ok(json!({
            "job_name": format!("dataprep-{guid}"),
            "role": role,
            "image": container_image,
            "instance_type": instance_type,
            "instance_count": instance_count,
            "inputs": [
                {
                    "name": "flow",
                    "data_uri": flow_uri,
                },
                {
                    "name": "input_data",
                    "data_uri": raw_data_uri,
                },
            ],
            "outputs": [
                {
                    "name": output_node,
                    "data_uri": output_uri,
                    "content_type": "CSV",
                },
            ],
            "max_runtime_seconds": 86_400,
        }))
    }
}

/// Fill execution-input defaults for keys the config leaves unset
fn apply_defaults(payload: &mut StagePayload, inputs: &InitInputs) {
    if payload.get_str(sections::WORKSPACE, "s3_bucket").is_none() {
        payload.set(
            sections::WORKSPACE,
            "s3_bucket",
            json!(inputs.default_workspace),
        );
    }

    if payload.get_str(sections::DATA, "s3_bucket").is_none() {
        payload.set(sections::DATA, "s3_bucket", json!(inputs.default_workspace));
    }

    if payload.get_str(sections::SECURITY, "iam_role").is_none() {
        payload.set(sections::SECURITY, "iam_role", json!(inputs.default_role));
    }
}

/// Stamp timestamped resource names from the configured base names.
/// Deterministic names let every downstream stage describe-or-create.
fn stamp_resource_names(payload: &mut StagePayload) -> Result<(), StageError> {
    let now = Utc::now().format("%Y-%m-%d-%H-%M-%S").to_string();

    let automl_base = payload.require_str(sections::AUTOML, "job_base_name")?.to_string();
    let model_base = payload.require_str(sections::MODEL, "model_base_name")?.to_string();
    let bias_base = payload.require_str(sections::BIAS, "job_base_name")?.to_string();
    let xai_base = payload.require_str(sections::XAI, "job_base_name")?.to_string();
    let error_base = payload
        .require_str(sections::ERROR_ANALYSIS, "job_base_name")?
        .to_string();

    payload.set(sections::AUTOML, "job_name", json!(format!("{automl_base}-{now}")));
    payload.set(sections::MODEL, "model_name", json!(format!("{model_base}-{now}")));
    payload.set(sections::BIAS, "job_name", json!(format!("{bias_base}-{now}")));
    payload.set(sections::XAI, "job_name", json!(format!("{xai_base}-{now}")));
    payload.set(
        sections::ERROR_ANALYSIS,
        "job_name",
        json!(format!("{error_base}-{now}")),
    );

    Ok(())
}

/// Point the flow document's object-store dataset source at `data_uri`.
/// Only object-store sources are supported by this blueprint.
fn retarget_flow_source(flow: &mut Value, data_uri: &str) -> Result<(), StageError> {
    let nodes = flow
        .get_mut("nodes")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| StageError::Platform(crate::adapters::PlatformError::Api {
            status: 422,
            message: "flow document has no nodes".to_string(),
        }))?;

    for node in nodes {
        let Some(dataset) = node
            .get_mut("parameters")
            .and_then(|p| p.get_mut("dataset_definition"))
        else {
            continue;
        };

        let source_type = dataset
            .get("source_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if source_type != "S3" {
            return Err(StageError::Platform(crate::adapters::PlatformError::Api {
                status: 422,
                message: format!("{source_type} sources are not supported by this blueprint"),
            }));
        }

        dataset["name"] = json!("input_data");
        dataset["s3_uri"] = json!(data_uri);
    }

    Ok(())
}
