//! Scriptable fakes for the pipeline's collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use uuid::Uuid;

use crate::core::{
    AutomationRun, ComponentDescriptor, ComponentKind, DeployOptions, DeploymentDetails,
    DeploymentPackage, DeploymentStatus, ExtractedRequirements, GeneratedUnit, PackageKind,
    RunCompletion, RunWithSteps, StatusReport, StepRecord, TargetSystem,
};
use crate::errors::{DeployError, GatewayError};
use crate::gateway::DeploymentGateway;
use crate::generation::{
    FieldRequest, MetadataGenerator, RequirementExtractor, RuleRequest,
    StandardMetadataGenerator, ValidationReport,
};
use crate::runlog::{InMemoryRunLog, RunLog, RunLogError};

#[derive(Debug, Clone)]
struct Submission {
    id: String,
    package: DeploymentPackage,
    options: DeployOptions,
    polls: u32,
    applied: bool,
}

/// An in-memory deployment target.
///
/// Successful deploy packages make their components visible to
/// `describe_component`; successful destructive packages remove them.
/// Failures and slow deployments are scripted through the setters.
#[derive(Debug)]
pub struct FakeGateway {
    submissions: Mutex<Vec<Submission>>,
    present: Mutex<BTreeSet<String>>,
    hidden: Mutex<HashSet<String>>,
    deploy_errors: Mutex<VecDeque<GatewayError>>,
    status_errors: Mutex<VecDeque<GatewayError>>,
    describe_errors: Mutex<VecDeque<GatewayError>>,
    deploy_result: Mutex<StatusReport>,
    rollback_result: Mutex<StatusReport>,
    details: Mutex<Option<DeploymentDetails>>,
    pending_polls: AtomicU32,
    deploy_calls: AtomicUsize,
    status_calls: AtomicUsize,
    describe_calls: AtomicUsize,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    /// Creates a gateway where every deployment succeeds on the first poll.
    #[must_use]
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            present: Mutex::new(BTreeSet::new()),
            hidden: Mutex::new(HashSet::new()),
            deploy_errors: Mutex::new(VecDeque::new()),
            status_errors: Mutex::new(VecDeque::new()),
            describe_errors: Mutex::new(VecDeque::new()),
            deploy_result: Mutex::new(StatusReport::new(DeploymentStatus::Succeeded)),
            rollback_result: Mutex::new(StatusReport::new(DeploymentStatus::Succeeded)),
            details: Mutex::new(None),
            pending_polls: AtomicU32::new(0),
            deploy_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            describe_calls: AtomicUsize::new(0),
        }
    }

    /// Final report for additive packages.
    pub fn set_deploy_result(&self, report: StatusReport) {
        *self.deploy_result.lock() = report;
    }

    /// Final report for destructive packages.
    pub fn set_rollback_result(&self, report: StatusReport) {
        *self.rollback_result.lock() = report;
    }

    /// Number of `InProgress` reports before the final one.
    pub fn set_pending_polls(&self, polls: u32) {
        self.pending_polls.store(polls, Ordering::SeqCst);
    }

    /// Makes a component invisible to lookups even after it is deployed.
    pub fn hide_component(&self, full_name: impl Into<String>) {
        self.hidden.lock().insert(full_name.into());
    }

    /// Overrides what `get_deployment_details` reports.
    pub fn set_details(&self, details: DeploymentDetails) {
        *self.details.lock() = Some(details);
    }

    /// Queues an error for the next `deploy` call.
    pub fn push_deploy_error(&self, error: GatewayError) {
        self.deploy_errors.lock().push_back(error);
    }

    /// Queues an error for the next `check_status` call.
    pub fn push_status_error(&self, error: GatewayError) {
        self.status_errors.lock().push_back(error);
    }

    /// Queues an error for the next `describe_component` call.
    pub fn push_describe_error(&self, error: GatewayError) {
        self.describe_errors.lock().push_back(error);
    }

    /// Number of `deploy` calls, including failed ones.
    #[must_use]
    pub fn deploy_calls(&self) -> usize {
        self.deploy_calls.load(Ordering::SeqCst)
    }

    /// Number of `check_status` calls.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `describe_component` calls.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    /// Accepted packages in submission order.
    #[must_use]
    pub fn submitted_packages(&self) -> Vec<DeploymentPackage> {
        self.submissions
            .lock()
            .iter()
            .map(|s| s.package.clone())
            .collect()
    }

    /// Options of accepted packages in submission order.
    #[must_use]
    pub fn submitted_options(&self) -> Vec<DeployOptions> {
        self.submissions
            .lock()
            .iter()
            .map(|s| s.options.clone())
            .collect()
    }

    /// Accepted destructive packages.
    #[must_use]
    pub fn rollback_packages(&self) -> Vec<DeploymentPackage> {
        self.submitted_packages()
            .into_iter()
            .filter(|p| p.kind == PackageKind::Destroy)
            .collect()
    }

    /// Returns true when the component currently exists on the target.
    #[must_use]
    pub fn has_component(&self, full_name: &str) -> bool {
        self.present.lock().contains(full_name)
    }

    fn apply(&self, package: &DeploymentPackage) {
        let mut present = self.present.lock();
        for component in package.components() {
            match package.kind {
                PackageKind::Deploy => {
                    present.insert(component.full_name);
                }
                PackageKind::Destroy => {
                    present.remove(&component.full_name);
                }
            }
        }
    }
}

#[async_trait]
impl DeploymentGateway for FakeGateway {
    async fn deploy(
        &self,
        _target: &TargetSystem,
        package: &DeploymentPackage,
        options: &DeployOptions,
    ) -> Result<String, GatewayError> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.deploy_errors.lock().pop_front() {
            return Err(error);
        }

        let mut submissions = self.submissions.lock();
        let id = format!("0Af{:012}", submissions.len() + 1);
        submissions.push(Submission {
            id: id.clone(),
            package: package.clone(),
            options: options.clone(),
            polls: 0,
            applied: false,
        });
        Ok(id)
    }

    async fn check_status(
        &self,
        _target: &TargetSystem,
        deployment_id: &str,
    ) -> Result<StatusReport, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.status_errors.lock().pop_front() {
            return Err(error);
        }

        let pending = self.pending_polls.load(Ordering::SeqCst);
        let mut submissions = self.submissions.lock();
        let submission = submissions
            .iter_mut()
            .find(|s| s.id == deployment_id)
            .ok_or_else(|| {
                GatewayError::from_status(404, format!("unknown deployment {deployment_id}"))
            })?;

        submission.polls += 1;
        if submission.polls <= pending {
            return Ok(StatusReport::new(DeploymentStatus::InProgress));
        }

        let report = match submission.package.kind {
            PackageKind::Deploy => self.deploy_result.lock().clone(),
            PackageKind::Destroy => self.rollback_result.lock().clone(),
        };
        if report.status.is_success() && !submission.applied {
            submission.applied = true;
            let package = submission.package.clone();
            drop(submissions);
            self.apply(&package);
        }
        Ok(report)
    }

    async fn describe_component(
        &self,
        _target: &TargetSystem,
        kind: ComponentKind,
        full_name: &str,
    ) -> Result<Option<ComponentDescriptor>, GatewayError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.describe_errors.lock().pop_front() {
            return Err(error);
        }
        if self.hidden.lock().contains(full_name) || !self.has_component(full_name) {
            return Ok(None);
        }
        Ok(Some(ComponentDescriptor::new(kind, full_name)))
    }

    async fn get_deployment_details(
        &self,
        _target: &TargetSystem,
        deployment_id: &str,
    ) -> Result<DeploymentDetails, GatewayError> {
        if let Some(details) = self.details.lock().clone() {
            return Ok(details);
        }
        self.submissions
            .lock()
            .iter()
            .find(|s| s.id == deployment_id)
            .map(|s| DeploymentDetails {
                components: s.package.components(),
            })
            .ok_or_else(|| {
                GatewayError::from_status(404, format!("unknown deployment {deployment_id}"))
            })
    }
}

/// Returns canned requirements.
///
/// Text registered with [`with_response`](Self::with_response) gets its own
/// answer; anything else gets the fallback.
#[derive(Debug, Default)]
pub struct StaticExtractor {
    fallback: ExtractedRequirements,
    responses: HashMap<String, ExtractedRequirements>,
    error: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl StaticExtractor {
    /// Answers every text with `requirements`.
    #[must_use]
    pub fn new(requirements: ExtractedRequirements) -> Self {
        Self {
            fallback: requirements,
            ..Self::default()
        }
    }

    /// Fails every call with an extraction error.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Registers an answer for one exact text.
    #[must_use]
    pub fn with_response(mut self, text: impl Into<String>, requirements: ExtractedRequirements) -> Self {
        self.responses.insert(text.into(), requirements);
        self
    }

    /// Texts passed to `parse`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RequirementExtractor for StaticExtractor {
    async fn parse(&self, text: &str) -> Result<ExtractedRequirements, DeployError> {
        self.calls.lock().push(text.to_string());
        if let Some(message) = &self.error {
            return Err(DeployError::Extraction(message.clone()));
        }
        Ok(self
            .responses
            .get(text)
            .unwrap_or(&self.fallback)
            .clone())
    }
}

/// The standard generator with scripted failures.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    inner: StandardMetadataGenerator,
    failures: HashMap<String, String>,
    rejections: Vec<String>,
}

impl ScriptedGenerator {
    /// Creates a generator that behaves like the standard one.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails generation of the requirement with this label or rule name.
    #[must_use]
    pub fn fail_on(mut self, requirement: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.insert(requirement.into(), reason.into());
        self
    }

    /// Adds a failure to every batch validation.
    #[must_use]
    pub fn reject(mut self, message: impl Into<String>) -> Self {
        self.rejections.push(message.into());
        self
    }

    fn scripted_failure(&self, requirement: &str) -> Result<(), DeployError> {
        match self.failures.get(requirement) {
            Some(reason) => Err(DeployError::generation(requirement, reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MetadataGenerator for ScriptedGenerator {
    async fn generate_field(&self, request: &FieldRequest) -> Result<GeneratedUnit, DeployError> {
        self.scripted_failure(&request.requirement.label)?;
        self.inner.generate_field(request).await
    }

    async fn generate_rule(&self, request: &RuleRequest) -> Result<GeneratedUnit, DeployError> {
        self.scripted_failure(&request.requirement.name)?;
        self.inner.generate_rule(request).await
    }

    async fn validate(&self, units: &[GeneratedUnit]) -> ValidationReport {
        let mut errors = self.inner.validate(units).await.errors;
        errors.extend(self.rejections.iter().cloned());
        ValidationReport::from_errors(errors)
    }
}

/// An [`InMemoryRunLog`] whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyRunLog {
    inner: InMemoryRunLog,
    failing_writes: AtomicU32,
    unavailable: AtomicBool,
}

impl FlakyRunLog {
    /// Creates a healthy log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` writes with a transient error.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Fails every write until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The backing log.
    #[must_use]
    pub fn inner(&self) -> &InMemoryRunLog {
        &self.inner
    }

    fn check_write(&self) -> Result<(), RunLogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RunLogError::Unavailable("run log is down".to_string()));
        }
        let took = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(RunLogError::Unavailable("connection reset".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl RunLog for FlakyRunLog {
    async fn create_run(&self, source_ref: &str) -> Result<Uuid, RunLogError> {
        self.check_write()?;
        self.inner.create_run(source_ref).await
    }

    async fn record_step(&self, run_id: Uuid, step: &StepRecord) -> Result<(), RunLogError> {
        self.check_write()?;
        self.inner.record_step(run_id, step).await
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        completion: &RunCompletion,
    ) -> Result<(), RunLogError> {
        self.check_write()?;
        self.inner.complete_run(run_id, completion).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<RunWithSteps, RunLogError> {
        self.inner.get_run(run_id).await
    }

    async fn list_runs(&self, source_ref: &str) -> Result<Vec<AutomationRun>, RunLogError> {
        self.inner.list_runs(source_ref).await
    }
}
