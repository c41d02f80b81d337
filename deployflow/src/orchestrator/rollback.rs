//! Compensating rollback of a deployed package.

use serde_json::json;
use std::fmt;
use tracing::{error, info, warn};

use super::result::RunWarning;
use super::runner::{Orchestrator, RunState};
use crate::core::{DeploymentDescriptor, DeploymentPackage, StepRecord, StepType, TargetSystem};
use crate::errors::DeployError;

/// Why a deployed package is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RollbackReason {
    VerificationFailure,
    Cancellation,
    StageFailure,
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerificationFailure => write!(f, "verification failure"),
            Self::Cancellation => write!(f, "cancellation"),
            Self::StageFailure => write!(f, "a failure after deployment"),
        }
    }
}

impl Orchestrator {
    /// Removes exactly the components recorded in the run's descriptor.
    ///
    /// Runs at most once per run. The outcome lands in the run state as a
    /// warning on success, or as an error plus a manual-intervention
    /// warning on failure.
    pub(super) async fn rollback(&self, state: &mut RunState, reason: RollbackReason) {
        if state.rollback_attempted {
            return;
        }
        state.rollback_attempted = true;

        let (Some(descriptor), Some(target)) = (state.descriptor.clone(), state.target.clone())
        else {
            return;
        };
        let deployment_id = descriptor.external_id.clone();

        info!(run_id = %state.run_id, %deployment_id, %reason, "Rolling back deployment");
        self.sink.try_emit(
            "rollback.started",
            Some(json!({
                "run_id": state.run_id,
                "deployment_id": deployment_id,
                "reason": reason.to_string(),
                "components": descriptor.component_names(),
            })),
        );

        let step = StepRecord::running(
            StepType::Deploy,
            json!({
                "operation": "rollback",
                "deployment_id": deployment_id,
                "reason": reason.to_string(),
                "components": descriptor.component_names(),
            }),
        );
        if let Err(err) = self.write_step(state.run_id, &step).await {
            warn!(run_id = %state.run_id, error = %err, "Rollback step could not be recorded");
            state.warn(format!("rollback step could not be recorded: {err}"));
        }

        let outcome = self.remove_components(state, &descriptor, &target).await;

        let record = match &outcome {
            Ok(rollback_id) => step.completed(json!({
                "rollback_deployment_id": rollback_id,
                "removed": descriptor.component_names(),
            })),
            Err(err) => step.failed(err.to_dict()),
        };
        if let Err(err) = self.write_step(state.run_id, &record).await {
            warn!(run_id = %state.run_id, error = %err, "Rollback result could not be recorded");
            state.warn(format!("rollback result could not be recorded: {err}"));
        }

        match outcome {
            Ok(rollback_id) => {
                state.rolled_back = true;
                info!(run_id = %state.run_id, %deployment_id, %rollback_id, "Rollback completed");
                state.warn(format!(
                    "Deployment {deployment_id} rolled back due to {reason}"
                ));
                self.sink.try_emit(
                    "rollback.completed",
                    Some(json!({
                        "run_id": state.run_id,
                        "deployment_id": deployment_id,
                        "rollback_deployment_id": rollback_id,
                    })),
                );
            }
            Err(err) => {
                let failure = DeployError::rollback_failed(&deployment_id, err.to_string());
                error!(run_id = %state.run_id, %deployment_id, error = %err, "Rollback failed");
                state.errors.push(failure.to_string());
                state.warnings.push(RunWarning::manual(format!(
                    "Manual intervention required: deployment {deployment_id} on target '{}' could not be rolled back; remove {} by hand",
                    descriptor.target_id,
                    descriptor.component_names().join(", ")
                )));
                self.sink.try_emit(
                    "rollback.failed",
                    Some(json!({
                        "run_id": state.run_id,
                        "deployment_id": deployment_id,
                        "error": failure.to_dict(),
                    })),
                );
            }
        }
    }

    async fn remove_components(
        &self,
        state: &RunState,
        descriptor: &DeploymentDescriptor,
        target: &TargetSystem,
    ) -> Result<String, DeployError> {
        let package = DeploymentPackage::destructive(&descriptor.components, &self.config.api_version);
        let mut options = self
            .config
            .deploy
            .clone()
            .with_idempotency_key(format!("{}:rollback:{}", state.run_id, package.checksum()));
        options.check_only = false;

        let rollback_id = self.gateway.submit(target, &package, &options).await?;
        let outcome = self
            .gateway
            .poll_status(target, &rollback_id, &self.config.rollback_poll)
            .await?;
        if !outcome.success {
            return Err(DeployError::DeploymentFailed {
                deployment_id: rollback_id,
                status: outcome.status.to_string(),
                message: outcome
                    .error_message
                    .unwrap_or_else(|| "no error message reported".to_string()),
            });
        }
        Ok(rollback_id)
    }
}
