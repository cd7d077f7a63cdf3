//! Stage handlers for the blueprint pipeline.
//!
//! Each handler follows the same contract the platform's task states
//! expect: describe a job by its deterministic name; if it does not
//! exist, build the request from the shared payload and submit it; poll
//! the job on a fixed interval bounded by the invocation's remaining
//! time; on completion, write results under the stage's `job-results`
//! key and return the payload for the next stage.

pub mod automl;
pub mod bias;
pub mod error_analysis;
pub mod init;
pub mod registration;
pub mod xai;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::adapters::PlatformError;
use crate::core::retry::{poll_until, TimeBudget, WaitError};
use crate::domain::execution::JobStatus;
use crate::domain::payload::{ConfigError, StagePayload};

pub use automl::{AutoMlEngine, AutoMlStage};
pub use bias::BiasAnalysisStage;
pub use error_analysis::ErrorAnalysisStage;
pub use init::{InitInputs, InitStage};
pub use registration::RegistrationStage;
pub use xai::XaiAnalysisStage;

/// Default seconds between job-status probes
const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Per-invocation context a stage runs under
#[derive(Debug, Clone, Copy)]
pub struct StageContext {
    /// Remaining-time budget of this invocation
    pub budget: TimeBudget,

    /// Interval between job-status probes
    pub poll_interval: Duration,
}

impl StageContext {
    pub fn new(budget: TimeBudget) -> Self {
        Self {
            budget,
            poll_interval: DEFAULT_JOB_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Stage failures
#[derive(Debug, Error)]
pub enum StageError {
    /// The invocation's time budget ran out while waiting on a job
    #[error("task timed out after {elapsed:?} waiting on job '{job}'")]
    TimedOut { job: String, elapsed: Duration },

    /// The job reached a failure-class terminal status
    #[error("job '{job}' finished with status {status}")]
    JobFailed { job: String, status: JobStatus },

    /// The configured AutoML engine has no handler
    #[error("'{engine}' is not a supported automl engine")]
    UnsupportedEngine { engine: String },

    /// The AutoML search finished without producing a candidate
    #[error("automl job '{job}' produced no candidates")]
    NoCandidates { job: String },

    /// A data prefix the stage must read from holds no objects
    #[error("no data objects found under '{prefix}'")]
    EmptyPrefix { prefix: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// A blueprint stage: consumes the shared payload, adds its results,
/// hands the payload to the next stage
#[async_trait]
pub trait Stage {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        payload: StagePayload,
        ctx: &StageContext,
    ) -> Result<StagePayload, StageError>;
}

/// Poll `describe` until the job reaches a terminal status within the
/// context's budget. Completed jobs return their status; failure-class
/// statuses and budget exhaustion are errors.
pub(crate) async fn wait_for_job<F, Fut>(
    job_name: &str,
    ctx: &StageContext,
    mut describe: F,
) -> Result<JobStatus, StageError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<JobStatus, PlatformError>>,
{
    let waited = poll_until(ctx.poll_interval, ctx.budget, || {
        let fut = describe();
        async move {
            let status = fut.await?;
            Ok::<_, PlatformError>(status.is_terminal().then_some(status))
        }
    })
    .await;

    let status = match waited {
        Ok(status) => status,
        Err(WaitError::TimedOut { elapsed }) => {
            return Err(StageError::TimedOut {
                job: job_name.to_string(),
                elapsed,
            })
        }
        Err(WaitError::Inner(e)) => return Err(e.into()),
    };

    if status == JobStatus::Completed {
        Ok(status)
    } else {
        Err(StageError::JobFailed {
            job: job_name.to_string(),
            status,
        })
    }
}

/// Resolve the object-store URI a producing job actually wrote under.
///
/// Some producers append opaque child directories below their configured
/// output prefix. The blueprint configures a unique prefix per run, so
/// the parent of the first key under it is the real data location.
pub(crate) async fn resolve_data_prefix<S>(
    store: &S,
    prefix_uri: &str,
) -> Result<String, StageError>
where
    S: crate::adapters::ObjectStore + ?Sized,
{
    let key = store
        .first_key(prefix_uri)
        .await?
        .ok_or_else(|| StageError::EmptyPrefix {
            prefix: prefix_uri.to_string(),
        })?;

    let (bucket, _) = crate::adapters::split_object_uri(prefix_uri)?;
    let parent = match key.rsplit_once('/') {
        Some((dir, _file)) => dir,
        None => "",
    };

    Ok(format!("s3://{bucket}/{parent}"))
}

/// Read the header row of the first CSV object under a prefix
pub(crate) async fn csv_headers<S>(store: &S, prefix_uri: &str) -> Result<Vec<String>, StageError>
where
    S: crate::adapters::ObjectStore + ?Sized,
{
    let key = store
        .first_key(prefix_uri)
        .await?
        .ok_or_else(|| StageError::EmptyPrefix {
            prefix: prefix_uri.to_string(),
        })?;

    let (bucket, _) = crate::adapters::split_object_uri(prefix_uri)?;
    let body = store.get_text(&format!("s3://{bucket}/{key}")).await?;

    let header_line = body.lines().next().unwrap_or_default();
    Ok(header_line
        .split(',')
        .map(|column| column.trim().to_string())
        .collect())
}

/// Build the workspace output URI for a stage's configured prefix
pub(crate) fn workspace_uri(
    payload: &StagePayload,
    suffix: &str,
) -> Result<String, ConfigError> {
    use crate::domain::payload::sections;

    let bucket = payload.require_str(sections::WORKSPACE, "s3_bucket")?;
    let prefix = payload.require_str(sections::WORKSPACE, "s3_prefix")?;
    Ok(format!("s3://{bucket}/{prefix}/{suffix}"))
}
