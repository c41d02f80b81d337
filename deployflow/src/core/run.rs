//! Run and step records as stored by the run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{RunStatus, StepStatus, StepType};

/// One invocation of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRun {
    /// Run id.
    pub id: Uuid,
    /// External reference of the requirement source.
    pub source_ref: String,
    /// Current status.
    pub status: RunStatus,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Set when the run reaches a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Summary error for failed runs.
    #[serde(default)]
    pub error: Option<String>,
    /// Result metadata written on completion.
    #[serde(default)]
    pub result_metadata: serde_json::Value,
}

impl AutomationRun {
    /// Creates a running record.
    #[must_use]
    pub fn new(source_ref: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_ref: source_ref.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            result_metadata: serde_json::Value::Null,
        }
    }
}

/// One audit record within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationStep {
    /// Step id, chosen by the writer.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Pipeline stage.
    pub step_type: StepType,
    /// Current status.
    pub status: StepStatus,
    /// Stage input payload.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Stage output payload.
    #[serde(default)]
    pub output: serde_json::Value,
    /// Error payload for failed steps.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    /// Time the step was first recorded.
    pub started_at: DateTime<Utc>,
    /// Time the step reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Insertion order within the run; breaks `started_at` ties.
    pub sequence: u64,
}

/// A write to the step log.
///
/// `step_id` is generated by the caller and makes repeated writes of the
/// same record idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Idempotency key of the step.
    pub step_id: Uuid,
    /// Pipeline stage.
    pub step_type: StepType,
    /// Status to record.
    pub status: StepStatus,
    /// Input payload.
    #[serde(default)]
    pub input: serde_json::Value,
    /// Output payload.
    #[serde(default)]
    pub output: serde_json::Value,
    /// Error payload.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl StepRecord {
    /// A fresh step in `Running` state.
    #[must_use]
    pub fn running(step_type: StepType, input: serde_json::Value) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            step_type,
            status: StepStatus::Running,
            input,
            output: serde_json::Value::Null,
            error: None,
        }
    }

    /// Marks this step completed with `output`.
    #[must_use]
    pub fn completed(mut self, output: serde_json::Value) -> Self {
        self.status = StepStatus::Completed;
        self.output = output;
        self
    }

    /// Marks this step failed with `error`.
    #[must_use]
    pub fn failed(mut self, error: serde_json::Value) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self
    }
}

/// Terminal write for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletion {
    /// Terminal status.
    pub status: RunStatus,
    /// Result metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Summary error.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunCompletion {
    /// Creates a completion.
    #[must_use]
    pub fn new(status: RunStatus, metadata: serde_json::Value) -> Self {
        Self {
            status,
            metadata,
            error: None,
        }
    }

    /// Attaches a summary error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A run together with its ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWithSteps {
    /// The run.
    pub run: AutomationRun,
    /// Steps ordered by start time.
    pub steps: Vec<AutomationStep>,
}

impl RunWithSteps {
    /// Step types in order.
    #[must_use]
    pub fn step_types(&self) -> Vec<StepType> {
        self.steps.iter().map(|s| s.step_type).collect()
    }

    /// Steps of a given type.
    pub fn steps_of(&self, step_type: StepType) -> impl Iterator<Item = &AutomationStep> {
        self.steps.iter().filter(move |s| s.step_type == step_type)
    }

    /// Returns true when a step of `step_type` exists.
    #[must_use]
    pub fn has_step(&self, step_type: StepType) -> bool {
        self.steps_of(step_type).next().is_some()
    }

    /// Returns true when every step is in a terminal status.
    #[must_use]
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_record_transitions_keep_id() {
        let running = StepRecord::running(StepType::Parse, json!({"source": "PROJ-1"}));
        let id = running.step_id;

        let done = running.completed(json!({"requirements": 2}));

        assert_eq!(done.step_id, id);
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.input["source"], "PROJ-1");
    }

    #[test]
    fn test_failed_record_carries_error() {
        let failed = StepRecord::running(StepType::Deploy, json!({}))
            .failed(json!({"type": "GatewayError"}));

        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.error.unwrap()["type"], "GatewayError");
    }
}
