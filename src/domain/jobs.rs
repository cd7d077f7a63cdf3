//! Wire types for the managed ML platform's job APIs.
//!
//! These mirror the request/response shapes of the platform's AutoML,
//! processing (bias/explainability), batch transform, and model
//! registration endpoints. The orchestrator only assembles and reads
//! them; the hard work happens on the platform side.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::execution::JobStatus;

/// Completion criteria for an AutoML search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionCriteria {
    pub max_candidates: u64,

    /// Hard cap on the whole search, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime_seconds: Option<u64>,
}

/// One input channel for an AutoML job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDataConfig {
    /// Object-store prefix holding the training data
    pub data_uri: String,

    /// Column the model predicts
    pub target_attribute: String,
}

/// Request to start an AutoML search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMlJobRequest {
    pub job_name: String,
    pub inputs: Vec<InputDataConfig>,
    pub output_uri: String,
    pub completion: CompletionCriteria,
    pub problem_type: String,

    /// Objective metric the search optimizes
    pub objective_metric: String,
    pub role: String,

    /// Engine timeout for the whole job, in seconds
    pub timeout_seconds: u64,
}

/// Best candidate found by a finished AutoML search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestCandidate {
    pub name: String,
    pub objective_metric: String,
    pub objective_value: f64,

    /// Inference container chain for the candidate
    pub containers: Vec<ContainerDef>,
}

/// A single inference container definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDef {
    pub image: String,
    pub model_data_uri: String,

    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// Description of an AutoML job as returned by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMlJobDescription {
    pub job_name: String,
    pub status: JobStatus,
    pub inputs: Vec<InputDataConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_candidate: Option<BestCandidate>,
}

/// Request to run an analysis processing job (bias or explainability)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJobRequest {
    pub job_name: String,
    pub role: String,
    pub instance_type: String,
    pub instance_count: u64,

    /// Input dataset location
    pub data_uri: String,
    pub output_uri: String,

    /// Label column
    pub target_attribute: String,

    /// Column headers of the dataset, in order
    pub headers: Vec<String>,

    /// Model the analysis queries for predictions
    pub model: AnalysisModelConfig,

    /// Analysis-specific parameters (bias config, SHAP config, ...)
    pub analysis: Value,
}

/// Model endpoint configuration shared by the analysis jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisModelConfig {
    pub model_name: String,
    pub instance_type: String,
    pub instance_count: u64,
    pub content_type: String,
}

/// Description of a processing job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJobDescription {
    pub job_name: String,
    pub status: JobStatus,
}

/// Request to run a batch transform (scoring) job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformJobRequest {
    pub job_name: String,
    pub model_name: String,
    pub instance_type: String,
    pub instance_count: u64,
    pub data_uri: String,
    pub output_uri: String,
    pub content_type: String,
    pub split_type: String,
    pub strategy: String,
    pub assemble_with: String,

    /// Column filter applied to the input before scoring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_filter: Option<String>,

    /// How scored rows are joined back to their inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filter: Option<String>,
}

/// Description of a transform job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformJobDescription {
    pub job_name: String,
    pub status: JobStatus,
}

/// Request to register a model from its container chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model_name: String,
    pub role: String,
    pub containers: Vec<ContainerDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automl_request_serialization() {
        let request = AutoMlJobRequest {
            job_name: "demo-automl-2026-01-01-00-00-00".to_string(),
            inputs: vec![InputDataConfig {
                data_uri: "s3://ws/data/prepped".to_string(),
                target_attribute: "churn".to_string(),
            }],
            output_uri: "s3://ws/blueprints/demo/candidates".to_string(),
            completion: CompletionCriteria {
                max_candidates: 25,
                max_runtime_seconds: None,
            },
            problem_type: "BinaryClassification".to_string(),
            objective_metric: "F1".to_string(),
            role: "arn:role/blueprint".to_string(),
            timeout_seconds: 86_400,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["completion"]["max_candidates"], 25);
        // Unset options stay off the wire
        assert!(json["completion"].get("max_runtime_seconds").is_none());
    }

    #[test]
    fn test_container_env_defaults_empty() {
        let json = r#"{"image":"img:1","model_data_uri":"s3://m/artifact"}"#;
        let container: ContainerDef = serde_json::from_str(json).unwrap();
        assert!(container.environment.is_empty());
    }
}
