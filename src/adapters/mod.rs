//! Adapter interfaces for the managed ML platform.
//!
//! Three seams cover everything the orchestrator consumes:
//! - `WorkflowEngine`: state-machine executions and their event history
//! - `MlPlatform`: AutoML, processing, transform, and model APIs
//! - `ObjectStore`: blueprint config and dataset objects

pub mod http;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::execution::{EventPage, ExecutionStatus};
use crate::domain::jobs::{
    AutoMlJobDescription, AutoMlJobRequest, ModelRequest, ProcessingJobDescription,
    ProcessingJobRequest, TransformJobDescription, TransformJobRequest,
};

// Re-export the gateway client
pub use http::PlatformClient;

/// Errors crossing the managed-service boundary.
///
/// `NotFound` is its own variant so stage handlers can describe-or-create;
/// everything else is either transient transport trouble or a hard API
/// rejection.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("platform API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed platform response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PlatformError {
    /// Transport failures and server-side 5xx responses are worth retrying;
    /// not-found and 4xx rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// State-machine execution API
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Resolve a workflow id from its human name
    async fn find_workflow(&self, name: &str) -> Result<Option<String>, PlatformError>;

    /// Start an execution; returns the execution handle
    async fn start_execution(
        &self,
        workflow_id: &str,
        input: &Value,
    ) -> Result<String, PlatformError>;

    /// Current status of an execution
    async fn describe_execution(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatus, PlatformError>;

    /// Final output payload of a finished execution
    async fn execution_output(&self, execution_id: &str) -> Result<Value, PlatformError>;

    /// One page of history, chronological, starting at `next_token`
    /// (or the beginning when `None`)
    async fn execution_history(
        &self,
        execution_id: &str,
        page_size: usize,
        next_token: Option<&str>,
    ) -> Result<EventPage, PlatformError>;
}

/// Managed job APIs: AutoML search, analysis processing, batch transform,
/// and model registration
#[async_trait]
pub trait MlPlatform: Send + Sync {
    async fn describe_automl_job(
        &self,
        name: &str,
    ) -> Result<AutoMlJobDescription, PlatformError>;

    async fn create_automl_job(&self, request: &AutoMlJobRequest) -> Result<(), PlatformError>;

    async fn describe_processing_job(
        &self,
        name: &str,
    ) -> Result<ProcessingJobDescription, PlatformError>;

    async fn create_processing_job(
        &self,
        request: &ProcessingJobRequest,
    ) -> Result<(), PlatformError>;

    async fn describe_transform_job(
        &self,
        name: &str,
    ) -> Result<TransformJobDescription, PlatformError>;

    async fn create_transform_job(
        &self,
        request: &TransformJobRequest,
    ) -> Result<(), PlatformError>;

    async fn create_model(&self, request: &ModelRequest) -> Result<(), PlatformError>;
}

/// Object storage, addressed by `s3://bucket/key` style URIs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_json(&self, uri: &str) -> Result<Value, PlatformError>;

    async fn put_json(&self, uri: &str, value: &Value) -> Result<(), PlatformError>;

    /// Raw text body of a single object
    async fn get_text(&self, uri: &str) -> Result<String, PlatformError>;

    /// Store a raw text body at `uri`
    async fn put_text(&self, uri: &str, body: &str) -> Result<(), PlatformError>;

    /// Object keys under a prefix URI, in key order, at most `max_keys`
    async fn list_keys(
        &self,
        prefix_uri: &str,
        max_keys: usize,
    ) -> Result<Vec<String>, PlatformError>;

    /// First object key under a prefix URI, if any. Used to resolve output
    /// prefixes where the producing job appends directories of its own.
    async fn first_key(&self, prefix_uri: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.list_keys(prefix_uri, 1).await?.into_iter().next())
    }
}

/// Split an `s3://bucket/key` style URI into (bucket, key)
pub fn split_object_uri(uri: &str) -> Result<(&str, &str), PlatformError> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| PlatformError::Api {
            status: 400,
            message: format!("object URI must start with s3://, got '{uri}'"),
        })?;

    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() => Ok((bucket, key)),
        _ => Err(PlatformError::Api {
            status: 400,
            message: format!("object URI '{uri}' has no bucket/key"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_object_uri() {
        let (bucket, key) =
            split_object_uri("s3://ws-bucket/blueprints/demo/config.json").unwrap();
        assert_eq!(bucket, "ws-bucket");
        assert_eq!(key, "blueprints/demo/config.json");
    }

    #[test]
    fn test_split_rejects_non_uri() {
        assert!(split_object_uri("/local/path").is_err());
        assert!(split_object_uri("s3://").is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Api {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(!PlatformError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!PlatformError::NotFound {
            kind: "automl job",
            name: "j".into()
        }
        .is_transient());
    }
}
