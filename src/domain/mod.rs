//! Domain types for the autoflow orchestrator.
//!
//! This module contains the core data structures:
//! - Execution: remote state-machine status and history events
//! - Payload: the stage-keyed blueprint configuration document
//! - Jobs: wire types for the managed platform's job APIs

pub mod execution;
pub mod jobs;
pub mod payload;

// Re-export commonly used types
pub use execution::{EventPage, ExecutionStatus, HistoryEvent, JobStatus, StateTransition};
pub use jobs::{
    AutoMlJobDescription, AutoMlJobRequest, BestCandidate, ContainerDef, ModelRequest,
    ProcessingJobRequest, TransformJobRequest,
};
pub use payload::{ConfigError, StagePayload, JOB_RESULTS_KEY};
