//! What a run returns to its caller.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{GeneratedUnit, RunStatus};
use crate::errors::DeployError;

/// A non-fatal note about a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    /// Human-readable text.
    pub message: String,
    /// Set when an operator has to clean up by hand.
    #[serde(default)]
    pub requires_manual_intervention: bool,
}

impl RunWarning {
    /// An informational warning.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requires_manual_intervention: false,
        }
    }

    /// A warning that needs operator action.
    #[must_use]
    pub fn manual(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requires_manual_intervention: true,
        }
    }
}

/// Result metadata persisted with the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Units generated by the run.
    pub units: Vec<GeneratedUnit>,
    /// Error text.
    pub errors: Vec<String>,
    /// Warnings.
    pub warnings: Vec<RunWarning>,
    /// Deployment id, once submitted.
    pub deployment_id: Option<String>,
    /// Target that received the deployment.
    pub target_id: Option<String>,
    /// Requested production target, when redirected.
    pub redirected_from: Option<String>,
    /// Whether a compensating rollback completed.
    pub rolled_back: bool,
    /// Whether the run stopped after validation.
    pub dry_run: bool,
}

/// Outcome of [`Orchestrator::run`](super::Orchestrator::run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationResult {
    /// Run id; `None` when the run record could not be created.
    pub run_id: Option<Uuid>,
    /// Terminal status.
    pub status: RunStatus,
    /// Result metadata, when the run got started.
    pub metadata: Option<RunMetadata>,
    /// Deployment id, once submitted.
    pub deployment_id: Option<String>,
    /// Error text.
    pub errors: Vec<String>,
    /// Warnings.
    pub warnings: Vec<RunWarning>,
}

impl AutomationResult {
    pub(crate) fn not_started(error: &DeployError) -> Self {
        Self {
            run_id: None,
            status: RunStatus::Failed,
            metadata: None,
            deployment_id: None,
            errors: vec![format!("run could not be started: {error}")],
            warnings: Vec::new(),
        }
    }

    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Returns true when any warning needs operator action.
    #[must_use]
    pub fn requires_manual_intervention(&self) -> bool {
        self.warnings.iter().any(|w| w.requires_manual_intervention)
    }

    /// Warning texts.
    #[must_use]
    pub fn warning_messages(&self) -> Vec<&str> {
        self.warnings.iter().map(|w| w.message.as_str()).collect()
    }

    /// Returns true if any warning contains `text`.
    #[must_use]
    pub fn has_warning(&self, text: &str) -> bool {
        self.warnings.iter().any(|w| w.message.contains(text))
    }

    /// Returns true if any error contains `text`.
    #[must_use]
    pub fn has_error(&self, text: &str) -> bool {
        self.errors.iter().any(|e| e.contains(text))
    }
}
