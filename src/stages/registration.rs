//! Model registration stage: turns the AutoML search's best candidate
//! into a registered model usable by the analysis and scoring stages.

use async_trait::async_trait;
use tracing::info;

use crate::adapters::MlPlatform;
use crate::domain::jobs::{ContainerDef, ModelRequest};
use crate::domain::payload::{sections, StagePayload};

use super::{Stage, StageContext, StageError};

/// Sparse-encoding switch the candidate's transform container honors
const SPARSE_ENCODE_ENV: &str = "AUTOML_SPARSE_ENCODE_RECORDIO_PROTOBUF";

/// Env var naming the response fields the inference container emits
const RESPONSE_KEYS_ENV: &str = "INFERENCE_RESPONSE_KEYS";

/// Registers the best candidate as a model
pub struct RegistrationStage<'a, P> {
    platform: &'a P,
}

impl<'a, P: MlPlatform> RegistrationStage<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }
}

/// Prepare the candidate's container chain for registration: sparse
/// encoding on the leading transform container, response keys on the
/// trailing inference container.
fn configure_containers(
    mut containers: Vec<ContainerDef>,
    response_keys: Option<&Vec<String>>,
) -> Vec<ContainerDef> {
    if let Some(first) = containers.first_mut() {
        first
            .environment
            .insert(SPARSE_ENCODE_ENV.to_string(), "1".to_string());
    }

    if let (Some(last), Some(keys)) = (containers.last_mut(), response_keys) {
        last.environment
            .insert(RESPONSE_KEYS_ENV.to_string(), keys.join(","));
    }

    containers
}

#[async_trait]
impl<P: MlPlatform> Stage for RegistrationStage<'_, P> {
    fn name(&self) -> &'static str {
        "model-registration"
    }

    async fn run(
        &self,
        payload: StagePayload,
        _ctx: &StageContext,
    ) -> Result<StagePayload, StageError> {
        let model_name = payload
            .require_str(sections::MODEL, "model_name")?
            .to_string();
        let role = payload.require_str(sections::SECURITY, "iam_role")?.to_string();
        let automl_job = payload
            .require_str(sections::AUTOML, "job_name")?
            .to_string();

        let description = self.platform.describe_automl_job(&automl_job).await?;
        let best = description
            .best_candidate
            .ok_or_else(|| StageError::NoCandidates {
                job: automl_job.clone(),
            })?;

        let response_keys: Option<Vec<String>> = payload
            .get(sections::MODEL, "inference_response_keys")
            .and_then(|keys| serde_json::from_value(keys.clone()).ok());

        let containers = configure_containers(best.containers, response_keys.as_ref());

        info!(model = %model_name, candidate = %best.name, "registering best candidate");
        self.platform
            .create_model(&ModelRequest {
                model_name,
                role,
                containers,
            })
            .await?;

        Ok(payload)
    }
}
