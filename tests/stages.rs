//! Stage Handler Integration Tests
//!
//! Exercises the describe-or-create contract, result merging, and
//! timeout behavior of the stage handlers against in-memory fakes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use autoflow::adapters::split_object_uri;
use autoflow::domain::jobs::{
    AutoMlJobDescription, AutoMlJobRequest, BestCandidate, ContainerDef, ModelRequest,
    ProcessingJobDescription, ProcessingJobRequest, TransformJobDescription, TransformJobRequest,
};
use autoflow::domain::payload::sections;
use autoflow::core::retry::TimeBudget;
use autoflow::stages::{
    AutoMlStage, ErrorAnalysisStage, InitInputs, InitStage, RegistrationStage, Stage,
    StageContext, StageError,
};
use autoflow::{JobStatus, MlPlatform, ObjectStore, PlatformError, StagePayload};

/// In-memory object store keyed by full URI
#[derive(Default)]
struct MemStore {
    objects: Mutex<BTreeMap<String, String>>,
}

impl MemStore {
    fn with(objects: &[(&str, &str)]) -> Self {
        let store = Self::default();
        {
            let mut map = store.objects.lock().unwrap();
            for (uri, body) in objects {
                map.insert(uri.to_string(), body.to_string());
            }
        }
        store
    }
}

#[async_trait]
impl ObjectStore for MemStore {
    async fn get_json(&self, uri: &str) -> Result<Value, PlatformError> {
        let body = self.get_text(uri).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn put_json(&self, uri: &str, value: &Value) -> Result<(), PlatformError> {
        self.put_text(uri, &value.to_string()).await
    }

    async fn get_text(&self, uri: &str) -> Result<String, PlatformError> {
        self.objects
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "object",
                name: uri.to_string(),
            })
    }

    async fn put_text(&self, uri: &str, body: &str) -> Result<(), PlatformError> {
        self.objects
            .lock()
            .unwrap()
            .insert(uri.to_string(), body.to_string());
        Ok(())
    }

    async fn list_keys(
        &self,
        prefix_uri: &str,
        max_keys: usize,
    ) -> Result<Vec<String>, PlatformError> {
        let (bucket, _) = split_object_uri(prefix_uri)?;
        let uri_prefix = format!("{prefix_uri}/");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|uri| uri.starts_with(&uri_prefix) || uri.as_str() == prefix_uri)
            .take(max_keys)
            .map(|uri| uri[format!("s3://{bucket}/").len()..].to_string())
            .collect())
    }
}

/// In-memory ML platform. Created jobs complete immediately unless a
/// status is pinned for their name.
#[derive(Default)]
struct FakePlatform {
    automl: Mutex<HashMap<String, AutoMlJobDescription>>,
    processing: Mutex<HashMap<String, JobStatus>>,
    transform: Mutex<HashMap<String, JobStatus>>,
    created_automl: Mutex<Vec<AutoMlJobRequest>>,
    created_processing: Mutex<Vec<ProcessingJobRequest>>,
    created_transform: Mutex<Vec<TransformJobRequest>>,
    created_models: Mutex<Vec<ModelRequest>>,
    /// Best candidate attached to AutoML jobs created through the fake
    best_candidate: Mutex<Option<BestCandidate>>,
}

#[async_trait]
impl MlPlatform for FakePlatform {
    async fn describe_automl_job(
        &self,
        name: &str,
    ) -> Result<AutoMlJobDescription, PlatformError> {
        self.automl
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: "automl job",
                name: name.to_string(),
            })
    }

    async fn create_automl_job(&self, request: &AutoMlJobRequest) -> Result<(), PlatformError> {
        self.created_automl.lock().unwrap().push(request.clone());
        self.automl.lock().unwrap().insert(
            request.job_name.clone(),
            AutoMlJobDescription {
                job_name: request.job_name.clone(),
                status: JobStatus::Completed,
                inputs: request.inputs.clone(),
                best_candidate: self.best_candidate.lock().unwrap().clone(),
            },
        );
        Ok(())
    }

    async fn describe_processing_job(
        &self,
        name: &str,
    ) -> Result<ProcessingJobDescription, PlatformError> {
        self.processing
            .lock()
            .unwrap()
            .get(name)
            .map(|status| ProcessingJobDescription {
                job_name: name.to_string(),
                status: *status,
            })
            .ok_or_else(|| PlatformError::NotFound {
                kind: "processing job",
                name: name.to_string(),
            })
    }

    async fn create_processing_job(
        &self,
        request: &ProcessingJobRequest,
    ) -> Result<(), PlatformError> {
        self.created_processing.lock().unwrap().push(request.clone());
        self.processing
            .lock()
            .unwrap()
            .insert(request.job_name.clone(), JobStatus::Completed);
        Ok(())
    }

    async fn describe_transform_job(
        &self,
        name: &str,
    ) -> Result<TransformJobDescription, PlatformError> {
        self.transform
            .lock()
            .unwrap()
            .get(name)
            .map(|status| TransformJobDescription {
                job_name: name.to_string(),
                status: *status,
            })
            .ok_or_else(|| PlatformError::NotFound {
                kind: "transform job",
                name: name.to_string(),
            })
    }

    async fn create_transform_job(
        &self,
        request: &TransformJobRequest,
    ) -> Result<(), PlatformError> {
        self.created_transform.lock().unwrap().push(request.clone());
        self.transform
            .lock()
            .unwrap()
            .insert(request.job_name.clone(), JobStatus::Completed);
        Ok(())
    }

    async fn create_model(&self, request: &ModelRequest) -> Result<(), PlatformError> {
        self.created_models.lock().unwrap().push(request.clone());
        Ok(())
    }
}

fn ctx() -> StageContext {
    StageContext::new(TimeBudget::new(Duration::from_secs(300)))
        .with_poll_interval(Duration::from_millis(1))
}

fn candidate(value: f64) -> BestCandidate {
    BestCandidate {
        name: "candidate-1".to_string(),
        objective_metric: "F1".to_string(),
        objective_value: value,
        containers: vec![
            ContainerDef {
                image: "transform:1".to_string(),
                model_data_uri: "s3://m/transform".to_string(),
                environment: HashMap::new(),
            },
            ContainerDef {
                image: "inference:1".to_string(),
                model_data_uri: "s3://m/inference".to_string(),
                environment: HashMap::new(),
            },
        ],
    }
}

fn automl_payload() -> StagePayload {
    StagePayload::from_value(json!({
        "workspace-config": { "s3_bucket": "ws", "s3_prefix": "blueprints/demo" },
        "security-config": { "iam_role": "arn:role/blueprint" },
        "automl-config": {
            "job_name": "demo-automl-1",
            "target_name": "churn",
            "max_candidates": 25,
            "problem_type": "BinaryClassification",
            "metric_name": "F1",
            "minimum_performance": 0.7,
        },
        "model-config": { "model_name": "demo-model-1" },
        "dataprep-config": { "job-definition": {
            "outputs": [{ "data_uri": "s3://data/prepped/run-9" }]
        }},
    }))
    .unwrap()
}

#[tokio::test]
async fn test_automl_creates_job_with_resolved_data_path() {
    let platform = FakePlatform::default();
    *platform.best_candidate.lock().unwrap() = Some(candidate(0.9));

    // The dataprep job wrote below an opaque child directory
    let store = MemStore::with(&[(
        "s3://data/prepped/run-9/batch-7/part-0.csv",
        "a,b,churn\n1,2,0",
    )]);

    let stage = AutoMlStage::new(&platform, &store);
    let payload = stage.run(automl_payload(), &ctx()).await.unwrap();

    let created = platform.created_automl.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].inputs[0].data_uri, "s3://data/prepped/run-9/batch-7");

    // Qualification verdict and data location merged into the payload
    let results = payload.job_results(sections::MODEL).unwrap();
    assert_eq!(results["qualified"], json!(true));
    assert_eq!(results["best-candidate"]["objective"]["value"], json!(0.9));
    assert_eq!(
        payload.get_str(sections::AUTOML, "data_uri"),
        Some("s3://data/prepped/run-9/batch-7")
    );
}

#[tokio::test]
async fn test_automl_reattaches_to_existing_job() {
    let platform = FakePlatform::default();
    platform.automl.lock().unwrap().insert(
        "demo-automl-1".to_string(),
        AutoMlJobDescription {
            job_name: "demo-automl-1".to_string(),
            status: JobStatus::Completed,
            inputs: vec![autoflow::domain::jobs::InputDataConfig {
                data_uri: "s3://data/prepped/run-9/batch-7".to_string(),
                target_attribute: "churn".to_string(),
            }],
            best_candidate: Some(candidate(0.5)),
        },
    );
    let store = MemStore::default();

    let stage = AutoMlStage::new(&platform, &store);
    let payload = stage.run(automl_payload(), &ctx()).await.unwrap();

    // Nothing created, the existing job was adopted
    assert!(platform.created_automl.lock().unwrap().is_empty());

    // Below the performance bar
    let results = payload.job_results(sections::MODEL).unwrap();
    assert_eq!(results["qualified"], json!(false));
}

#[tokio::test]
async fn test_stuck_job_times_out_within_the_budget() {
    let platform = FakePlatform::default();
    platform
        .transform
        .lock()
        .unwrap()
        .insert("demo-errors-1".to_string(), JobStatus::InProgress);

    let payload = StagePayload::from_value(json!({
        "error-analysis-config": { "job_name": "demo-errors-1" },
    }))
    .unwrap();

    // A budget too small to cover even one poll interval
    let tight = StageContext::new(TimeBudget::new(Duration::ZERO))
        .with_poll_interval(Duration::from_millis(5));

    let stage = ErrorAnalysisStage::new(&platform);
    let err = stage.run(payload, &tight).await.unwrap_err();

    assert!(matches!(err, StageError::TimedOut { job, .. } if job == "demo-errors-1"));
}

#[tokio::test]
async fn test_failed_job_is_reported_with_its_status() {
    let platform = FakePlatform::default();
    platform
        .transform
        .lock()
        .unwrap()
        .insert("demo-errors-1".to_string(), JobStatus::Failed);

    let payload = StagePayload::from_value(json!({
        "error-analysis-config": { "job_name": "demo-errors-1" },
    }))
    .unwrap();

    let stage = ErrorAnalysisStage::new(&platform);
    let err = stage.run(payload, &ctx()).await.unwrap_err();

    assert!(matches!(
        err,
        StageError::JobFailed {
            status: JobStatus::Failed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_registration_configures_the_container_chain() {
    let platform = FakePlatform::default();
    platform.automl.lock().unwrap().insert(
        "demo-automl-1".to_string(),
        AutoMlJobDescription {
            job_name: "demo-automl-1".to_string(),
            status: JobStatus::Completed,
            inputs: Vec::new(),
            best_candidate: Some(candidate(0.9)),
        },
    );

    let payload = StagePayload::from_value(json!({
        "security-config": { "iam_role": "arn:role/blueprint" },
        "automl-config": { "job_name": "demo-automl-1" },
        "model-config": {
            "model_name": "demo-model-1",
            "inference_response_keys": ["predicted_label", "probability"],
        },
    }))
    .unwrap();

    let stage = RegistrationStage::new(&platform);
    stage.run(payload, &ctx()).await.unwrap();

    let models = platform.created_models.lock().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].model_name, "demo-model-1");
    assert_eq!(
        models[0].containers[0]
            .environment
            .get("AUTOML_SPARSE_ENCODE_RECORDIO_PROTOBUF")
            .map(String::as_str),
        Some("1")
    );
    assert_eq!(
        models[0].containers[1]
            .environment
            .get("INFERENCE_RESPONSE_KEYS")
            .map(String::as_str),
        Some("predicted_label,probability")
    );
}

#[tokio::test]
async fn test_registration_without_candidates_is_an_error() {
    let platform = FakePlatform::default();
    platform.automl.lock().unwrap().insert(
        "demo-automl-1".to_string(),
        AutoMlJobDescription {
            job_name: "demo-automl-1".to_string(),
            status: JobStatus::Completed,
            inputs: Vec::new(),
            best_candidate: None,
        },
    );

    let payload = StagePayload::from_value(json!({
        "security-config": { "iam_role": "arn:role/blueprint" },
        "automl-config": { "job_name": "demo-automl-1" },
        "model-config": { "model_name": "demo-model-1" },
    }))
    .unwrap();

    let stage = RegistrationStage::new(&platform);
    let err = stage.run(payload, &ctx()).await.unwrap_err();

    assert!(matches!(err, StageError::NoCandidates { job } if job == "demo-automl-1"));
}

#[tokio::test]
async fn test_init_resolves_and_persists_the_blueprint_config() {
    let config_uri = "s3://ws/automl-blueprint/config/blueprint-config.json";
    let store = MemStore::with(&[
        (
            config_uri,
            r#"{
                "workspace-config": { "s3_prefix": "blueprints/demo" },
                "data-config": { "raw_in_prefix": "data/raw", "prepped_out_prefix": "data/prepped" },
                "security-config": {},
                "automl-config": { "job_base_name": "demo-automl" },
                "model-config": { "model_base_name": "demo-model" },
                "bias-analysis-config": { "job_base_name": "demo-bias" },
                "xai-config": { "job_base_name": "demo-xai" },
                "error-analysis-config": { "job_base_name": "demo-errors" },
                "dataprep-config": {
                    "definition_file": "churn.flow",
                    "output_node_id": "output-1",
                    "instance_type": "compute.large",
                    "instance_count": 1,
                    "container_image": "dataprep:1"
                }
            }"#,
        ),
        (
            "s3://ws/blueprints/demo/meta/churn.flow",
            r#"{ "nodes": [
                { "parameters": { "dataset_definition": { "source_type": "S3", "s3_uri": "s3://old/data" } } }
            ]}"#,
        ),
    ]);

    let stage = InitStage::new(&store);
    let payload = stage
        .initialize(&InitInputs {
            config_uri: config_uri.to_string(),
            default_workspace: "ws".to_string(),
            default_role: "arn:role/default".to_string(),
        })
        .await
        .unwrap();

    // Defaults applied, names stamped, job definition assembled
    assert_eq!(payload.get_str(sections::WORKSPACE, "s3_bucket"), Some("ws"));
    assert_eq!(
        payload.get_str(sections::SECURITY, "iam_role"),
        Some("arn:role/default")
    );
    assert!(payload
        .get_str(sections::AUTOML, "job_name")
        .unwrap()
        .starts_with("demo-automl-"));

    let job_def = payload.require(sections::DATAPREP, "job-definition").unwrap();
    assert_eq!(job_def["inputs"][0]["data_uri"], json!("s3://ws/blueprints/demo/meta/churn.flow"));
    assert_eq!(job_def["inputs"][1]["data_uri"], json!("s3://ws/data/raw/"));

    // The flow source was retargeted and written back
    let flow = store
        .get_json("s3://ws/blueprints/demo/meta/churn.flow")
        .await
        .unwrap();
    assert_eq!(
        flow["nodes"][0]["parameters"]["dataset_definition"]["s3_uri"],
        json!("s3://ws/data/raw/")
    );

    // The resolved config persisted over the original
    let persisted = store.get_json(config_uri).await.unwrap();
    assert!(persisted["automl-config"]["job_name"].is_string());
}
