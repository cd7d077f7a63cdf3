//! Execution progress monitor.
//!
//! Walks a remote execution's event history to drive a live progress
//! display and detect terminal outcomes. The monitor is stateless across
//! poll cycles except for its visited-state map and scope counters: each
//! cycle re-reads the whole (paginated) history from the beginning and
//! relies on the map to make already-seen events no-ops, so a replayed
//! page never double-counts a stage.
//!
//! Parallel-branch containers open nested scopes. Instead of recursing,
//! the walker keeps an explicit stack of scope frames, which lets a
//! nested scope span page boundaries and poll cycles without re-reading
//! anything twice.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{PlatformError, WorkflowEngine};
use crate::domain::execution::{ExecutionStatus, HistoryEvent, StateTransition};

use super::retry::RetryPolicy;

/// Default seconds between poll cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default wall-clock cap on one watch call (3 hours)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10_800);

/// Default history page size
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// How a watch ended when the execution did not fail.
///
/// Timing out is an explicit outcome, distinct from both success and
/// failure: the execution may still be running, the monitor just stopped
/// waiting for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The expected number of top-level stages completed
    Completed { stages: usize },

    /// The wall-clock timeout elapsed before the expected count was reached
    TimedOut { elapsed: Duration },
}

/// Monitoring failures
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The execution reached a failure-class terminal status
    #[error("workflow execution {status}")]
    ExecutionFailed { status: ExecutionStatus },

    /// The event stream broke the entered-before-exited invariant. This
    /// is a bug in the event source or the walker, never a condition to
    /// recover from.
    #[error("corrupt execution history: state '{name}' exited without entering")]
    CorruptHistory { name: String },

    /// The engine could not be reached even after retries
    #[error(transparent)]
    Engine(#[from] PlatformError),
}

/// Receives progress notifications as the walker observes transitions.
///
/// `depth` is 0 for top-level stages and grows with parallel nesting;
/// substage notifications inside a parallel group arrive in addition to
/// the single notification for the group itself.
pub trait ProgressSink {
    /// A stage or parallel group was entered; also updates the
    /// "current stage" label
    fn stage_entered(&mut self, name: &str, depth: usize);

    /// A stage or parallel group completed
    fn stage_completed(&mut self, name: &str, depth: usize);

    /// The expected top-level stage count was reached
    fn workflow_completed(&mut self);
}

/// Sink that reports progress through `tracing`
#[derive(Debug, Default)]
pub struct TraceSink;

impl ProgressSink for TraceSink {
    fn stage_entered(&mut self, name: &str, depth: usize) {
        if depth == 0 {
            info!(stage = name, "entered workflow stage");
        } else {
            info!(stage = name, depth, "entered parallel substage");
        }
    }

    fn stage_completed(&mut self, name: &str, depth: usize) {
        info!(stage = name, depth, "stage completed");
    }

    fn workflow_completed(&mut self) {
        info!("workflow completed");
    }
}

/// Marker for a name in the visited map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Open,
    Closed,
}

/// One monitoring scope: the top-level walk or one parallel group
#[derive(Debug)]
struct ScopeFrame {
    /// Name of the parallel container that opened this scope; `None` for
    /// the top-level frame
    container: Option<String>,

    /// Completed stages observed while this frame was current
    completed: usize,
}

/// Walk state carried across poll cycles.
///
/// The visited map is shared by all frames: after a nested frame pops,
/// replaying its events must still be a no-op, which only works if the
/// closed markers outlive the frame.
struct HistoryWalk {
    visited: HashMap<String, Visit>,
    frames: Vec<ScopeFrame>,
}

impl HistoryWalk {
    fn new() -> Self {
        Self {
            visited: HashMap::new(),
            frames: vec![ScopeFrame {
                container: None,
                completed: 0,
            }],
        }
    }

    /// Completed count of the top-level scope
    fn top_level_completed(&self) -> usize {
        self.frames[0].completed
    }

    fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    /// Apply one event. Already-seen transitions are no-ops.
    fn apply(
        &mut self,
        event: &HistoryEvent,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), MonitorError> {
        match &event.transition {
            StateTransition::Entered { name, parallel } => {
                if self.visited.contains_key(name) {
                    // Replay of an earlier page, or a re-entry; either way
                    // the first sighting already did the work
                    return Ok(());
                }

                self.visited.insert(name.clone(), Visit::Open);
                sink.stage_entered(name, self.depth());

                if *parallel {
                    debug!(container = %name, "entering parallel scope");
                    self.frames.push(ScopeFrame {
                        container: Some(name.clone()),
                        completed: 0,
                    });
                }
            }

            StateTransition::Exited { name, parallel } => {
                match self.visited.get(name) {
                    None => {
                        return Err(MonitorError::CorruptHistory { name: name.clone() });
                    }
                    Some(Visit::Closed) => return Ok(()),
                    Some(Visit::Open) => {}
                }

                self.visited.insert(name.clone(), Visit::Closed);

                if *parallel {
                    self.close_parallel(name, sink)?;
                } else {
                    let depth = self.depth();
                    // The top-level frame never pops, so a current frame
                    // always exists
                    if let Some(frame) = self.frames.last_mut() {
                        frame.completed += 1;
                    }
                    sink.stage_completed(name, depth);
                }
            }
        }

        Ok(())
    }

    /// Pop the scope a parallel container opened. The nested count folds
    /// into the progress stream only; the enclosing scope's stage counter
    /// is not incremented for the container or its substages.
    fn close_parallel(
        &mut self,
        name: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), MonitorError> {
        let matches = self.frames.len() > 1
            && self.frames.last().and_then(|f| f.container.as_deref()) == Some(name);
        if !matches {
            // An exit for a container that is not the current scope means
            // the entered event never opened a frame
            return Err(MonitorError::CorruptHistory {
                name: name.to_string(),
            });
        }

        if let Some(frame) = self.frames.pop() {
            debug!(container = %name, substages = frame.completed, "parallel scope closed");
        }
        sink.stage_completed(name, self.depth());

        Ok(())
    }
}

/// Polls an execution and walks its history until it completes, fails,
/// or the monitor's own timeout elapses.
#[derive(Debug, Clone)]
pub struct ExecutionMonitor {
    poll_interval: Duration,
    timeout: Duration,
    page_size: usize,
    retry: RetryPolicy,
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Block (asynchronously) until the execution completes
    /// `expected_stages` top-level stages, reaches a failure-class status,
    /// or this monitor's timeout elapses.
    pub async fn watch<W, S>(
        &self,
        engine: &W,
        execution_id: &str,
        expected_stages: usize,
        sink: &mut S,
    ) -> Result<MonitorOutcome, MonitorError>
    where
        W: WorkflowEngine + ?Sized,
        S: ProgressSink,
    {
        let started = Instant::now();
        let mut walk = HistoryWalk::new();

        info!(execution = execution_id, expected_stages, "watching execution");

        loop {
            let status = self
                .retry
                .retry(
                    || engine.describe_execution(execution_id),
                    PlatformError::is_transient,
                )
                .await?;

            if status.is_terminal_failure() {
                warn!(execution = execution_id, %status, "execution failed");
                return Err(MonitorError::ExecutionFailed { status });
            }

            self.drain_history(engine, execution_id, &mut walk, sink).await?;

            let completed = walk.top_level_completed();
            debug!(execution = execution_id, completed, expected_stages, "poll cycle done");

            if completed >= expected_stages {
                sink.workflow_completed();
                return Ok(MonitorOutcome::Completed { stages: completed });
            }

            let elapsed = started.elapsed();
            if elapsed > self.timeout {
                warn!(execution = execution_id, ?elapsed, "monitor timed out");
                return Ok(MonitorOutcome::TimedOut { elapsed });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Fetch and walk every page of the history within one poll cycle
    async fn drain_history<W>(
        &self,
        engine: &W,
        execution_id: &str,
        walk: &mut HistoryWalk,
        sink: &mut dyn ProgressSink,
    ) -> Result<(), MonitorError>
    where
        W: WorkflowEngine + ?Sized,
    {
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .retry
                .retry(
                    || engine.execution_history(execution_id, self.page_size, next_token.as_deref()),
                    PlatformError::is_transient,
                )
                .await?;

            for event in &page.events {
                walk.apply(event, sink)?;
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(()),
            }
        }
    }
}
