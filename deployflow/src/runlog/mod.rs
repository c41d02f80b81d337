//! Run and step persistence.
//!
//! Writes are idempotent: a step is keyed by the caller-generated
//! `step_id`, and completing a run twice with the same status is a no-op.
//! This lets the orchestrator push every write through the retry handler.

mod memory;

pub use memory::InMemoryRunLog;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::core::{AutomationRun, RunCompletion, RunStatus, RunWithSteps, StepRecord, StepStatus};

/// Errors raised by a [`RunLog`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunLogError {
    /// No run with this id.
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    /// The step already reached a different terminal status.
    #[error("step {step_id} of run {run_id} is already {status}")]
    StepFinalized {
        /// Owning run.
        run_id: Uuid,
        /// Step id.
        step_id: Uuid,
        /// Recorded terminal status.
        status: StepStatus,
    },

    /// The run already reached a different terminal status.
    #[error("run {run_id} already finished as {status}")]
    RunFinalized {
        /// Run id.
        run_id: Uuid,
        /// Recorded terminal status.
        status: RunStatus,
    },

    /// The write does not describe a legal state change.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The backing store could not be reached.
    #[error("run log unavailable: {0}")]
    Unavailable(String),
}

impl RunLogError {
    /// Returns true when retrying the write may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Append-only store of runs and their audit steps.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Creates a `Running` run and returns its id.
    async fn create_run(&self, source_ref: &str) -> Result<Uuid, RunLogError>;

    /// Inserts or advances the step identified by `step.step_id`.
    ///
    /// Re-sending a record already stored is a no-op. A terminal step
    /// cannot move to a different status.
    async fn record_step(&self, run_id: Uuid, step: &StepRecord) -> Result<(), RunLogError>;

    /// Moves the run to a terminal status.
    async fn complete_run(&self, run_id: Uuid, completion: &RunCompletion)
        -> Result<(), RunLogError>;

    /// Loads a run with its steps in audit order.
    async fn get_run(&self, run_id: Uuid) -> Result<RunWithSteps, RunLogError>;

    /// All runs for one requirement source, oldest first.
    async fn list_runs(&self, source_ref: &str) -> Result<Vec<AutomationRun>, RunLogError>;
}
