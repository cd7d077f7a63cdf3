//! HTTP client for the ML platform gateway.
//!
//! The gateway fronts the managed services with a small JSON/REST
//! surface: workflows and executions, the job families, and an object
//! proxy. One `PlatformClient` implements all three adapter traits.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::execution::{EventPage, ExecutionStatus};
use crate::domain::jobs::{
    AutoMlJobDescription, AutoMlJobRequest, ModelRequest, ProcessingJobDescription,
    ProcessingJobRequest, TransformJobDescription, TransformJobRequest,
};

use super::{split_object_uri, MlPlatform, ObjectStore, PlatformError, WorkflowEngine};

/// Client for the platform gateway
pub struct PlatformClient {
    base_url: String,
    http: reqwest::Client,
}

/// Error body returned by the gateway on non-2xx responses
#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowSummary {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StartExecutionResponse {
    execution_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeExecutionResponse {
    status: ExecutionStatus,
    #[serde(default)]
    output: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListKeysResponse {
    keys: Vec<String>,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Decode a response, mapping 404 to `NotFound` and other non-2xx
    /// statuses to `Api` errors with the gateway's message.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        kind: &'static str,
        name: &str,
    ) -> Result<T, PlatformError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound {
                kind,
                name: name.to_string(),
            });
        }

        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<T>().await?)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        kind: &'static str,
        name: &str,
    ) -> Result<T, PlatformError> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(response, kind, name).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
        kind: &'static str,
        name: &str,
    ) -> Result<T, PlatformError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response, kind, name).await
    }
}

#[async_trait]
impl WorkflowEngine for PlatformClient {
    async fn find_workflow(&self, name: &str) -> Result<Option<String>, PlatformError> {
        let workflows: Vec<WorkflowSummary> =
            self.get("workflows", "workflow list", name).await?;

        Ok(workflows.into_iter().find(|w| w.name == name).map(|w| w.id))
    }

    async fn start_execution(
        &self,
        workflow_id: &str,
        input: &Value,
    ) -> Result<String, PlatformError> {
        // Client token makes a retried submit land on the same execution
        let body = json!({
            "input": input,
            "client_token": Uuid::new_v4().to_string(),
        });

        let started: StartExecutionResponse = self
            .post(
                &format!("workflows/{workflow_id}/executions"),
                &body,
                "workflow",
                workflow_id,
            )
            .await?;

        Ok(started.execution_id)
    }

    async fn describe_execution(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionStatus, PlatformError> {
        let described: DescribeExecutionResponse = self
            .get(
                &format!("executions/{execution_id}"),
                "execution",
                execution_id,
            )
            .await?;

        Ok(described.status)
    }

    async fn execution_output(&self, execution_id: &str) -> Result<Value, PlatformError> {
        let described: DescribeExecutionResponse = self
            .get(
                &format!("executions/{execution_id}"),
                "execution",
                execution_id,
            )
            .await?;

        described.output.ok_or_else(|| PlatformError::Api {
            status: 409,
            message: format!("execution '{execution_id}' has no output yet"),
        })
    }

    async fn execution_history(
        &self,
        execution_id: &str,
        page_size: usize,
        next_token: Option<&str>,
    ) -> Result<EventPage, PlatformError> {
        let mut path = format!("executions/{execution_id}/history?max_results={page_size}");
        if let Some(token) = next_token {
            path.push_str(&format!("&next_token={token}"));
        }

        self.get(&path, "execution", execution_id).await
    }
}

#[async_trait]
impl MlPlatform for PlatformClient {
    async fn describe_automl_job(
        &self,
        name: &str,
    ) -> Result<AutoMlJobDescription, PlatformError> {
        self.get(&format!("jobs/automl/{name}"), "automl job", name)
            .await
    }

    async fn create_automl_job(&self, request: &AutoMlJobRequest) -> Result<(), PlatformError> {
        let _: Value = self
            .post("jobs/automl", request, "automl job", &request.job_name)
            .await?;
        Ok(())
    }

    async fn describe_processing_job(
        &self,
        name: &str,
    ) -> Result<ProcessingJobDescription, PlatformError> {
        self.get(&format!("jobs/processing/{name}"), "processing job", name)
            .await
    }

    async fn create_processing_job(
        &self,
        request: &ProcessingJobRequest,
    ) -> Result<(), PlatformError> {
        let _: Value = self
            .post("jobs/processing", request, "processing job", &request.job_name)
            .await?;
        Ok(())
    }

    async fn describe_transform_job(
        &self,
        name: &str,
    ) -> Result<TransformJobDescription, PlatformError> {
        self.get(&format!("jobs/transform/{name}"), "transform job", name)
            .await
    }

    async fn create_transform_job(
        &self,
        request: &TransformJobRequest,
    ) -> Result<(), PlatformError> {
        let _: Value = self
            .post("jobs/transform", request, "transform job", &request.job_name)
            .await?;
        Ok(())
    }

    async fn create_model(&self, request: &ModelRequest) -> Result<(), PlatformError> {
        let _: Value = self
            .post("models", request, "model", &request.model_name)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for PlatformClient {
    async fn get_json(&self, uri: &str) -> Result<Value, PlatformError> {
        let (bucket, key) = split_object_uri(uri)?;
        self.get(&format!("objects/{bucket}/{key}"), "object", uri)
            .await
    }

    async fn put_json(&self, uri: &str, value: &Value) -> Result<(), PlatformError> {
        let (bucket, key) = split_object_uri(uri)?;
        let response = self
            .http
            .put(self.url(&format!("objects/{bucket}/{key}")))
            .json(value)
            .send()
            .await?;

        let _: Value = Self::decode(response, "object", uri).await?;
        Ok(())
    }

    async fn get_text(&self, uri: &str) -> Result<String, PlatformError> {
        let (bucket, key) = split_object_uri(uri)?;
        let response = self
            .http
            .get(self.url(&format!("objects/{bucket}/{key}")))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound {
                kind: "object",
                name: uri.to_string(),
            });
        }
        if !status.is_success() {
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message: status.to_string(),
            });
        }

        Ok(response.text().await?)
    }

    async fn put_text(&self, uri: &str, body: &str) -> Result<(), PlatformError> {
        let (bucket, key) = split_object_uri(uri)?;
        let response = self
            .http
            .put(self.url(&format!("objects/{bucket}/{key}")))
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(body.to_string())
            .send()
            .await?;

        let _: Value = Self::decode(response, "object", uri).await?;
        Ok(())
    }

    async fn list_keys(
        &self,
        prefix_uri: &str,
        max_keys: usize,
    ) -> Result<Vec<String>, PlatformError> {
        let (bucket, prefix) = split_object_uri(prefix_uri)?;
        let listed: ListKeysResponse = self
            .get(
                &format!("objects/{bucket}?prefix={prefix}&max_keys={max_keys}"),
                "object prefix",
                prefix_uri,
            )
            .await?;

        Ok(listed.keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = PlatformClient::new("https://gateway.example.com/");
        assert_eq!(
            client.url("executions/exec-123"),
            "https://gateway.example.com/executions/exec-123"
        );
    }

    #[test]
    fn test_trailing_slashes_trimmed() {
        let client = PlatformClient::new("http://localhost:9400///");
        assert_eq!(client.url("workflows"), "http://localhost:9400/workflows");
    }
}
