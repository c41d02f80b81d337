//! The deployment saga: PARSE, GENERATE, VALIDATE, DEPLOY, VERIFY.

use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::options::RunOptions;
use super::result::{AutomationResult, RunMetadata, RunWarning};
use super::rollback::RollbackReason;
use crate::config::OrchestratorConfig;
use crate::core::{
    ComponentDescriptor, DeploymentDescriptor, DeploymentPackage, ExtractedRequirements,
    GeneratedUnit, RequirementSource, RunCompletion, RunStatus, StepRecord, StepType,
    TargetRegistry, TargetSystem,
};
use crate::errors::{DeployError, ValidationError};
use crate::events::SharedEventSink;
use crate::gateway::ResilientGateway;
use crate::generation::{FieldRequest, MetadataGenerator, RequirementExtractor, RuleRequest};
use crate::observability::StepTimer;
use crate::resilience::RetryHandler;
use crate::runlog::RunLog;

pub(super) const DRY_RUN_WARNING: &str = "dry run completed, no deployment performed";

/// Drives runs through the pipeline.
///
/// Build one with [`OrchestratorBuilder`](super::OrchestratorBuilder). A
/// single orchestrator can serve many concurrent runs; the gateway
/// breakers are shared between them.
pub struct Orchestrator {
    pub(super) extractor: Arc<dyn RequirementExtractor>,
    pub(super) generator: Arc<dyn MetadataGenerator>,
    pub(super) gateway: ResilientGateway,
    pub(super) run_log: Arc<dyn RunLog>,
    pub(super) log_retry: RetryHandler,
    pub(super) targets: TargetRegistry,
    pub(super) config: OrchestratorConfig,
    pub(super) sink: SharedEventSink,
}

/// Mutable state of one run.
#[derive(Debug)]
pub(super) struct RunState {
    pub(super) run_id: Uuid,
    pub(super) open_step: Option<StepRecord>,
    pub(super) units: Vec<GeneratedUnit>,
    pub(super) errors: Vec<String>,
    pub(super) warnings: Vec<RunWarning>,
    pub(super) target: Option<TargetSystem>,
    pub(super) redirected_from: Option<String>,
    pub(super) descriptor: Option<DeploymentDescriptor>,
    pub(super) deployed: bool,
    pub(super) verified: bool,
    pub(super) rollback_attempted: bool,
    pub(super) rolled_back: bool,
    pub(super) dry_run: bool,
}

impl RunState {
    fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            open_step: None,
            units: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            target: None,
            redirected_from: None,
            descriptor: None,
            deployed: false,
            verified: false,
            rollback_attempted: false,
            rolled_back: false,
            dry_run,
        }
    }

    pub(super) fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(RunWarning::new(message));
    }
}

fn first_container(explicit: Option<&str>, fallback: Option<&str>) -> Option<String> {
    [explicit, fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn names(components: &[ComponentDescriptor]) -> Vec<&str> {
    components.iter().map(|c| c.full_name.as_str()).collect()
}

impl Orchestrator {
    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The resilient gateway, including its shared breakers.
    #[must_use]
    pub fn gateway(&self) -> &ResilientGateway {
        &self.gateway
    }

    /// The run log.
    #[must_use]
    pub fn run_log(&self) -> &Arc<dyn RunLog> {
        &self.run_log
    }

    /// Runs the pipeline once.
    ///
    /// Never fails: every failure is reported through the result's status,
    /// errors and warnings.
    pub async fn run(&self, options: RunOptions) -> AutomationResult {
        let run_log = self.run_log.as_ref();
        let source_ref = options.source.reference.as_str();
        let created = self
            .log_retry
            .execute("create_run", move || async move {
                run_log.create_run(source_ref).await.map_err(DeployError::from)
            })
            .await;
        let run_id = match created {
            Ok(id) => id,
            Err(err) => {
                error!(source_ref, error = %err, "Run could not be created");
                return AutomationResult::not_started(&err);
            }
        };

        info!(%run_id, source_ref, target = %options.target_ref, dry_run = options.dry_run, "Run started");
        self.sink.try_emit(
            "run.started",
            Some(json!({
                "run_id": run_id,
                "source_ref": source_ref,
                "target": options.target_ref,
                "dry_run": options.dry_run,
            })),
        );

        let mut state = RunState::new(run_id, options.dry_run);
        let status = match self.drive(&mut state, &options).await {
            Ok(status) => status,
            Err(err) => self.recover(&mut state, err).await,
        };
        self.finish(state, status).await
    }

    async fn drive(
        &self,
        state: &mut RunState,
        options: &RunOptions,
    ) -> Result<RunStatus, DeployError> {
        checkpoint(options)?;
        let requirements = self.parse(state, &options.source).await?;
        checkpoint(options)?;
        self.generate(state, requirements, options.default_container.as_deref())
            .await?;
        checkpoint(options)?;
        self.validate(state).await?;

        if options.dry_run {
            state.warn(DRY_RUN_WARNING);
            return Ok(if state.errors.is_empty() {
                RunStatus::Success
            } else {
                RunStatus::Failed
            });
        }

        checkpoint(options)?;
        self.deploy(state, options).await?;
        checkpoint(options)?;
        self.verify(state, options).await?;

        Ok(if state.errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        })
    }

    async fn parse(
        &self,
        state: &mut RunState,
        source: &RequirementSource,
    ) -> Result<ExtractedRequirements, DeployError> {
        let timer = StepTimer::start("parse");
        self.begin_step(
            state,
            StepType::Parse,
            json!({
                "source_ref": source.reference,
                "has_acceptance_criteria": source.acceptance_criteria.is_some(),
            }),
        )
        .await?;

        let mut requirements = self.extract(&source.text).await?;
        if let Some(criteria) = source
            .acceptance_criteria
            .as_deref()
            .filter(|text| !text.trim().is_empty())
        {
            requirements.merge(self.extract(criteria).await?);
        }
        for note in &requirements.ambiguities {
            state.warn(note.clone());
        }

        self.complete_step(
            state,
            json!({
                "fields": requirements.fields.len(),
                "validation_rules": requirements.validation_rules.len(),
                "ambiguities": requirements.ambiguities,
                "duration_ms": timer.elapsed_ms(),
            }),
        )
        .await?;
        Ok(requirements)
    }

    async fn extract(&self, text: &str) -> Result<ExtractedRequirements, DeployError> {
        self.extractor.parse(text).await.map_err(|err| match err {
            DeployError::Extraction(_) => err,
            other => DeployError::Extraction(other.to_string()),
        })
    }

    async fn generate(
        &self,
        state: &mut RunState,
        requirements: ExtractedRequirements,
        default_container: Option<&str>,
    ) -> Result<(), DeployError> {
        let timer = StepTimer::start("generate");
        self.begin_step(
            state,
            StepType::Generate,
            json!({
                "fields": requirements.fields.len(),
                "validation_rules": requirements.validation_rules.len(),
                "default_container": default_container,
            }),
        )
        .await?;

        let mut failed = 0usize;
        for field in requirements.fields {
            let label = field.label.clone();
            let generated = match first_container(field.container.as_deref(), default_container) {
                Some(container) => {
                    let request = FieldRequest {
                        requirement: field,
                        container,
                    };
                    self.generator.generate_field(&request).await
                }
                None => Err(DeployError::generation(&label, "no owning container")),
            };
            match generated {
                Ok(unit) => state.units.push(unit),
                Err(err) => {
                    warn!(run_id = %state.run_id, requirement = %label, error = %err, "Field generation failed");
                    failed += 1;
                    state.errors.push(err.to_string());
                }
            }
        }
        for rule in requirements.validation_rules {
            let name = rule.name.clone();
            let generated = match first_container(rule.container.as_deref(), default_container) {
                Some(container) => {
                    let request = RuleRequest {
                        requirement: rule,
                        container,
                    };
                    self.generator.generate_rule(&request).await
                }
                None => Err(DeployError::generation(&name, "no owning container")),
            };
            match generated {
                Ok(unit) => state.units.push(unit),
                Err(err) => {
                    warn!(run_id = %state.run_id, requirement = %name, error = %err, "Rule generation failed");
                    failed += 1;
                    state.errors.push(err.to_string());
                }
            }
        }

        let units = serde_json::to_value(&state.units)?;
        self.complete_step(
            state,
            json!({
                "units": units,
                "failed": failed,
                "duration_ms": timer.elapsed_ms(),
            }),
        )
        .await
    }

    async fn validate(&self, state: &mut RunState) -> Result<(), DeployError> {
        let timer = StepTimer::start("validate");
        let input = json!({ "units": state.units.len() });
        self.begin_step(state, StepType::Validate, input).await?;

        if state.units.is_empty() {
            return Err(ValidationError::new(vec![
                "no deployable units were generated".to_string(),
            ])
            .into());
        }

        let mut failures = Vec::new();
        for unit in &state.units {
            for message in &unit.validity().errors {
                failures.push(format!("{}: {message}", unit.full_name()));
            }
        }
        let report = self.generator.validate(&state.units).await;
        for message in report.errors {
            if !failures.contains(&message) {
                failures.push(message);
            }
        }
        if !failures.is_empty() {
            return Err(ValidationError::new(failures).into());
        }

        let count = state.units.len();
        self.complete_step(
            state,
            json!({
                "valid": true,
                "units": count,
                "duration_ms": timer.elapsed_ms(),
            }),
        )
        .await
    }

    async fn deploy(&self, state: &mut RunState, options: &RunOptions) -> Result<(), DeployError> {
        let timer = StepTimer::start("deploy");
        let input = json!({
            "target": options.target_ref,
            "force_production": options.force_production,
            "units": state.units.len(),
        });
        self.begin_step(state, StepType::Deploy, input).await?;

        let resolution = self
            .targets
            .resolve(&options.target_ref, options.force_production)?;
        let target = resolution.target;
        if let Some(requested) = resolution.redirected_from {
            warn!(
                run_id = %state.run_id,
                requested = %requested.id,
                target = %target.id,
                "Production target redirected to staging"
            );
            state.warn(format!(
                "production target '{}' redirected to staging target '{}'",
                requested.name, target.name
            ));
            state.redirected_from = Some(requested.id);
        }
        state.target = Some(target.clone());

        let package = DeploymentPackage::from_units(&state.units, &self.config.api_version);
        let deploy_options = self
            .config
            .deploy
            .clone()
            .with_idempotency_key(format!("{}:{}", state.run_id, package.checksum()));

        let deployment_id = self
            .gateway
            .submit(&target, &package, &deploy_options)
            .await?;
        info!(run_id = %state.run_id, %deployment_id, target = %target.id, components = package.len(), "Deployment submitted");
        state.descriptor = Some(DeploymentDescriptor::submitted(
            &deployment_id,
            &target,
            &package,
        ));

        let outcome = self
            .gateway
            .poll_status(&target, &deployment_id, &self.config.poll)
            .await?;
        if let Some(descriptor) = state.descriptor.as_mut() {
            descriptor.status = outcome.status;
        }
        if !outcome.success {
            return Err(DeployError::DeploymentFailed {
                deployment_id,
                status: outcome.status.to_string(),
                message: outcome
                    .error_message
                    .unwrap_or_else(|| "no error message reported".to_string()),
            });
        }
        state.deployed = true;
        info!(run_id = %state.run_id, %deployment_id, polls = outcome.polls, "Deployment succeeded");

        self.reconcile_details(state, &target, &deployment_id).await;

        let components = package.components();
        self.complete_step(
            state,
            json!({
                "deployment_id": deployment_id,
                "target": target.id,
                "status": outcome.status,
                "polls": outcome.polls,
                "components": names(&components),
                "duration_ms": timer.elapsed_ms(),
            }),
        )
        .await
    }

    /// Compares what the gateway says it deployed with what was submitted.
    /// The descriptor is left untouched either way.
    async fn reconcile_details(
        &self,
        state: &mut RunState,
        target: &TargetSystem,
        deployment_id: &str,
    ) {
        let submitted: BTreeSet<ComponentDescriptor> = state
            .descriptor
            .as_ref()
            .map(|d| d.components.iter().cloned().collect())
            .unwrap_or_default();

        match self.gateway.get_deployment_details(target, deployment_id).await {
            Ok(details) => {
                let reported: BTreeSet<ComponentDescriptor> =
                    details.components.into_iter().collect();
                if reported == submitted {
                    return;
                }
                let unreported: Vec<&str> = submitted
                    .difference(&reported)
                    .map(|c| c.full_name.as_str())
                    .collect();
                let unexpected: Vec<&str> = reported
                    .difference(&submitted)
                    .map(|c| c.full_name.as_str())
                    .collect();
                warn!(run_id = %state.run_id, deployment_id, ?unreported, ?unexpected, "Deployment details differ from the submitted package");
                state.warn(format!(
                    "deployment {deployment_id} details differ from the submitted package (not reported: [{}]; unexpected: [{}])",
                    unreported.join(", "),
                    unexpected.join(", ")
                ));
            }
            Err(err) => {
                warn!(run_id = %state.run_id, deployment_id, error = %err, "Deployment details unavailable");
                state.warn(format!(
                    "deployment details for {deployment_id} could not be fetched: {err}"
                ));
            }
        }
    }

    async fn verify(&self, state: &mut RunState, options: &RunOptions) -> Result<(), DeployError> {
        let timer = StepTimer::start("verify");
        let components: Vec<ComponentDescriptor> =
            state.units.iter().map(GeneratedUnit::component).collect();
        self.begin_step(
            state,
            StepType::Verify,
            json!({ "components": names(&components) }),
        )
        .await?;

        let target = state.target.clone().ok_or_else(|| {
            DeployError::Internal("verification started without a deployment target".to_string())
        })?;
        let report = self
            .gateway
            .verify_components(&target, &components, self.config.verify_concurrency)
            .await;

        for lookup_error in &report.errors {
            state.warn(format!("component lookup failed: {lookup_error}"));
        }
        // A missing component outranks a cancellation that arrived meanwhile.
        if !report.is_success() {
            return Err(DeployError::VerificationFailed {
                missing: report.missing,
            });
        }
        checkpoint(options)?;
        state.verified = true;

        self.complete_step(
            state,
            json!({
                "verified": report.verified,
                "duration_ms": timer.elapsed_ms(),
            }),
        )
        .await
    }

    async fn recover(&self, state: &mut RunState, err: DeployError) -> RunStatus {
        match &err {
            DeployError::Validation(validation) => {
                state.errors.extend(validation.errors.iter().cloned());
            }
            other => state.errors.push(other.to_string()),
        }

        if state.open_step.is_some() {
            self.fail_step(state, &err).await;
        } else {
            self.record_error_step(state, &err).await;
        }

        if state.deployed && !state.verified {
            let reason = match &err {
                DeployError::VerificationFailed { .. } => RollbackReason::VerificationFailure,
                DeployError::Cancelled(_) => RollbackReason::Cancellation,
                _ => RollbackReason::StageFailure,
            };
            self.rollback(state, reason).await;
            return RunStatus::Partial;
        }
        if state.deployed {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }

    async fn finish(&self, state: RunState, status: RunStatus) -> AutomationResult {
        let RunState {
            run_id,
            units,
            errors,
            mut warnings,
            target,
            redirected_from,
            descriptor,
            rolled_back,
            dry_run,
            ..
        } = state;
        let deployment_id = descriptor.map(|d| d.external_id);

        let mut metadata = RunMetadata {
            units,
            errors: errors.clone(),
            warnings: warnings.clone(),
            deployment_id: deployment_id.clone(),
            target_id: target.map(|t| t.id),
            redirected_from,
            rolled_back,
            dry_run,
        };

        let mut completion = RunCompletion::new(
            status,
            serde_json::to_value(&metadata).unwrap_or_default(),
        );
        if let Some(first) = errors.first() {
            completion = completion.with_error(first.clone());
        }

        let run_log = self.run_log.as_ref();
        let completion = &completion;
        let persisted = self
            .log_retry
            .execute("complete_run", move || async move {
                run_log
                    .complete_run(run_id, completion)
                    .await
                    .map_err(DeployError::from)
            })
            .await;
        if let Err(err) = persisted {
            error!(%run_id, error = %err, "Run completion could not be persisted");
            let warning = RunWarning::new(format!("run completion could not be persisted: {err}"));
            warnings.push(warning.clone());
            metadata.warnings.push(warning);
        }

        info!(%run_id, %status, errors = errors.len(), warnings = warnings.len(), "Run completed");
        self.sink.try_emit(
            "run.completed",
            Some(json!({
                "run_id": run_id,
                "status": status,
                "deployment_id": deployment_id,
                "errors": errors.len(),
                "warnings": warnings.len(),
            })),
        );

        AutomationResult {
            run_id: Some(run_id),
            status,
            metadata: Some(metadata),
            deployment_id,
            errors,
            warnings,
        }
    }

    pub(super) async fn write_step(
        &self,
        run_id: Uuid,
        step: &StepRecord,
    ) -> Result<(), DeployError> {
        let run_log = self.run_log.as_ref();
        self.log_retry
            .execute("record_step", move || async move {
                run_log
                    .record_step(run_id, step)
                    .await
                    .map_err(DeployError::from)
            })
            .await
    }

    async fn begin_step(
        &self,
        state: &mut RunState,
        step_type: StepType,
        input: serde_json::Value,
    ) -> Result<(), DeployError> {
        let step = StepRecord::running(step_type, input);
        self.write_step(state.run_id, &step).await?;
        info!(run_id = %state.run_id, step = %step_type, "Step started");
        self.sink.try_emit(
            "step.started",
            Some(json!({
                "run_id": state.run_id,
                "step_id": step.step_id,
                "step": step_type,
            })),
        );
        state.open_step = Some(step);
        Ok(())
    }

    async fn complete_step(
        &self,
        state: &mut RunState,
        output: serde_json::Value,
    ) -> Result<(), DeployError> {
        let step = state
            .open_step
            .clone()
            .ok_or_else(|| DeployError::Internal("no open step to complete".to_string()))?;
        let step_type = step.step_type;
        let completed = step.completed(output);
        self.write_step(state.run_id, &completed).await?;
        state.open_step = None;

        info!(run_id = %state.run_id, step = %step_type, "Step completed");
        self.sink.try_emit(
            "step.completed",
            Some(json!({
                "run_id": state.run_id,
                "step_id": completed.step_id,
                "step": step_type,
            })),
        );
        Ok(())
    }

    async fn fail_step(&self, state: &mut RunState, err: &DeployError) {
        let Some(step) = state.open_step.take() else {
            return;
        };
        let step_type = step.step_type;
        let failed = step.failed(err.to_dict());
        self.persist_failure(state, &failed).await;
        warn!(run_id = %state.run_id, step = %step_type, error = %err, "Step failed");
        self.sink.try_emit(
            "step.failed",
            Some(json!({
                "run_id": state.run_id,
                "step_id": failed.step_id,
                "step": step_type,
                "error": err.to_dict(),
            })),
        );
    }

    /// Records a failure that happened between stages.
    async fn record_error_step(&self, state: &mut RunState, err: &DeployError) {
        let step = StepRecord::running(StepType::Error, json!({ "error_type": err.kind() }))
            .failed(err.to_dict());
        self.persist_failure(state, &step).await;
        warn!(run_id = %state.run_id, error = %err, "Run interrupted between stages");
        self.sink.try_emit(
            "step.failed",
            Some(json!({
                "run_id": state.run_id,
                "step_id": step.step_id,
                "step": StepType::Error,
                "error": err.to_dict(),
            })),
        );
    }

    async fn persist_failure(&self, state: &mut RunState, step: &StepRecord) {
        if let Err(write_err) = self.write_step(state.run_id, step).await {
            error!(run_id = %state.run_id, step = %step.step_type, error = %write_err, "Step failure could not be recorded");
            state.warn(format!(
                "{} step failure could not be recorded: {write_err}",
                step.step_type
            ));
        }
    }
}

fn checkpoint(options: &RunOptions) -> Result<(), DeployError> {
    match options.cancel_reason() {
        Some(reason) => Err(DeployError::Cancelled(reason)),
        None => Ok(()),
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("gateway", &self.gateway)
            .field("targets", &self.targets)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_container_skips_blanks() {
        assert_eq!(first_container(Some("Account"), Some("Lead")), Some("Account".to_string()));
        assert_eq!(first_container(Some("  "), Some(" Lead ")), Some("Lead".to_string()));
        assert_eq!(first_container(None, None), None);
        assert_eq!(first_container(None, Some("")), None);
    }
}
