//! Status and step-type enums shared by runs, steps and deployments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an automation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The run is still executing.
    #[default]
    Running,
    /// Every step completed and no errors were collected.
    Success,
    /// Deployment or verification issues occurred but a best-effort outcome
    /// was reached.
    Partial,
    /// An unrecoverable error occurred before or during deployment.
    Failed,
}

impl RunStatus {
    /// Returns true once the run has left `Running`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// The pipeline stage an audit step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Requirement extraction.
    Parse,
    /// Unit generation.
    Generate,
    /// Local validation.
    Validate,
    /// Submission to the gateway (also used for rollbacks).
    Deploy,
    /// Post-deployment verification.
    Verify,
    /// A run-level failure not attributable to a stage.
    Error,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "PARSE"),
            Self::Generate => write!(f, "GENERATE"),
            Self::Validate => write!(f, "VALIDATE"),
            Self::Deploy => write!(f, "DEPLOY"),
            Self::Verify => write!(f, "VERIFY"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Status of a single audit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// The step has started.
    Running,
    /// The step finished successfully.
    Completed,
    /// The step finished with an error.
    Failed,
}

impl StepStatus {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status of a deployment as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Queued, not yet started.
    #[default]
    Pending,
    /// Being applied.
    InProgress,
    /// Applied in full.
    Succeeded,
    /// Applied with component failures.
    SucceededPartial,
    /// Not applied.
    Failed,
    /// Cancellation requested.
    Canceling,
    /// Cancelled before completion.
    Canceled,
}

impl DeploymentStatus {
    /// Returns true once the gateway will no longer change the status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::SucceededPartial | Self::Failed | Self::Canceled
        )
    }

    /// Only a full success counts; partial application is a failure for
    /// the pipeline.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::SucceededPartial => write!(f, "SucceededPartial"),
            Self::Failed => write!(f, "Failed"),
            Self::Canceling => write!(f, "Canceling"),
            Self::Canceled => write!(f, "Canceled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Partial.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_step_status_serialize() {
        let json = serde_json::to_string(&StepStatus::Completed).unwrap();
        assert_eq!(json, r#""COMPLETED""#);

        let back: StepStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StepStatus::Completed);
    }

    #[test]
    fn test_step_type_display_matches_serde() {
        for step in [
            StepType::Parse,
            StepType::Generate,
            StepType::Validate,
            StepType::Deploy,
            StepType::Verify,
            StepType::Error,
        ] {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{step}\""));
        }
    }

    #[test]
    fn test_deployment_status_partial_is_not_success() {
        assert!(DeploymentStatus::SucceededPartial.is_terminal());
        assert!(!DeploymentStatus::SucceededPartial.is_success());
        assert!(!DeploymentStatus::InProgress.is_terminal());
        assert!(!DeploymentStatus::Canceling.is_terminal());
    }
}
