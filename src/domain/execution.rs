//! Execution and event types for the workflow engine boundary.
//!
//! An execution is a single run of a blueprint's state machine on the
//! managed platform. Its history is an append-only, chronologically
//! ordered event log that the monitor walks page by page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a remote state-machine execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Still making progress
    Running,

    /// Finished successfully
    Succeeded,

    /// Finished with a failure
    Failed,

    /// Killed by the platform's execution timeout
    TimedOut,

    /// Stopped by an operator
    Aborted,
}

impl ExecutionStatus {
    /// Failure-class terminal states. `Succeeded` is terminal but not a failure.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Aborted)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// A single record in an execution's history.
///
/// Events are immutable and never reordered; the engine assigns
/// monotonically increasing ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Position in the history (monotonic)
    pub id: u64,

    /// When the transition happened
    pub timestamp: DateTime<Utc>,

    /// The state transition this event records
    #[serde(flatten)]
    pub transition: StateTransition,
}

/// State transitions the monitor cares about.
///
/// `parallel` distinguishes a parallel-branch container from an
/// ordinary stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateTransition {
    /// A named stage or parallel container began
    Entered { name: String, parallel: bool },

    /// A named stage or parallel container ended
    Exited { name: String, parallel: bool },
}

impl StateTransition {
    pub fn name(&self) -> &str {
        match self {
            Self::Entered { name, .. } | Self::Exited { name, .. } => name,
        }
    }
}

/// One page of execution history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<HistoryEvent>,

    /// Continuation token; `None` means this was the last page
    pub next_token: Option<String>,
}

/// Status of a platform job (AutoML, processing, or transform)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted or running
    InProgress,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,

    /// Stopped before completion
    Stopped,
}

impl JobStatus {
    /// Jobs stop being polled once they reach any of these
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_failure_classification() {
        assert!(ExecutionStatus::Failed.is_terminal_failure());
        assert!(ExecutionStatus::TimedOut.is_terminal_failure());
        assert!(ExecutionStatus::Aborted.is_terminal_failure());

        assert!(!ExecutionStatus::Running.is_terminal_failure());
        assert!(!ExecutionStatus::Succeeded.is_terminal_failure());
    }

    #[test]
    fn test_event_serialization_round_trip() {
        let event = HistoryEvent {
            id: 7,
            timestamp: Utc::now(),
            transition: StateTransition::Entered {
                name: "PrepData".to_string(),
                parallel: false,
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: HistoryEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.transition.name(), "PrepData");
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ExecutionStatus::TimedOut).unwrap();
        assert_eq!(json, "\"TIMED_OUT\"");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
    }
}
