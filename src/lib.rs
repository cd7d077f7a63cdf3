//! autoflow - AutoML blueprint orchestrator
//!
//! A Rust client and stage runtime for pipeline blueprints on a managed
//! ML platform: data prep, AutoML model search, model registration,
//! bias/explainability analysis, and batch scoring for error analysis.
//!
//! # Architecture
//!
//! The platform's state machine drives the pipeline; this crate supplies
//! both sides of it:
//! - Stage handlers consume a shared JSON payload, submit or re-attach
//!   to managed jobs by deterministic name, and merge their results back
//! - The execution monitor walks the (paginated) event history of a
//!   running execution to report live progress, including nested
//!   parallel branches
//!
//! # Modules
//!
//! - `adapters`: HTTP gateway client and the three platform seams
//! - `core`: execution monitor, polling/retry primitives, runner
//! - `domain`: payload, execution, and job wire types
//! - `stages`: the blueprint stage handlers
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start a blueprint and wait for it
//! autoflow run customer-churn --wait
//!
//! # Re-attach to a running execution
//! autoflow watch exec-123
//!
//! # Read results out of a finished execution
//! autoflow best-model exec-123
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

// Re-export main types at crate root for convenience
pub use crate::core::{
    BlueprintRunner, ExecutionMonitor, MonitorError, MonitorOutcome, ProgressSink, RunnerError,
    TraceSink,
};
pub use adapters::{MlPlatform, ObjectStore, PlatformClient, PlatformError, WorkflowEngine};
pub use domain::execution::{ExecutionStatus, HistoryEvent, JobStatus, StateTransition};
pub use domain::payload::{ConfigError, StagePayload};
pub use stages::{Stage, StageContext, StageError};
