//! Core orchestration logic.
//!
//! - `monitor`: the execution progress monitor (event-history walker)
//! - `retry`: time-bounded polling and backoff primitives
//! - `runner`: blueprint execution entry points

pub mod monitor;
pub mod retry;
pub mod runner;

pub use monitor::{ExecutionMonitor, MonitorError, MonitorOutcome, ProgressSink, TraceSink};
pub use retry::{poll_until, RetryPolicy, TimeBudget, WaitError};
pub use runner::{BlueprintRunner, RunnerError};
