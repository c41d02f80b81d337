//! Ready-made requirements, configuration and orchestrators for tests.

use std::sync::Arc;
use uuid::Uuid;

use super::fakes::{FakeGateway, StaticExtractor};
use crate::config::OrchestratorConfig;
use crate::core::{
    ExtractedRequirements, FieldRequirement, FieldType, PollOptions, RequirementSource,
    RuleRequirement, RunWithSteps, TargetSystem,
};
use crate::errors::DeployError;
use crate::events::CollectingEventSink;
use crate::gateway::DeploymentGateway;
use crate::generation::{MetadataGenerator, RequirementExtractor};
use crate::orchestrator::{Orchestrator, OrchestratorBuilder, RunOptions};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::runlog::{InMemoryRunLog, RunLog};

/// Id of the staging target in [`test_config`].
pub const STAGING_TARGET: &str = "stg";
/// Id of the production target in [`test_config`].
pub const PRODUCTION_TARGET: &str = "prod";

/// Two fields and one validation rule on `Account`.
#[must_use]
pub fn sample_requirements() -> ExtractedRequirements {
    ExtractedRequirements::new()
        .with_field(
            FieldRequirement::new("Customer Tier", FieldType::Picklist)
                .on("Account")
                .with_values(["Gold", "Silver", "Bronze"]),
        )
        .with_field(
            FieldRequirement::new("Renewal Date", FieldType::Date)
                .on("Account")
                .required(),
        )
        .with_rule(
            RuleRequirement::new(
                "Tier Required",
                "ISBLANK(TEXT(Customer_Tier__c))",
                "Customer tier is required",
            )
            .on("Account"),
        )
}

/// A requirement source without acceptance criteria.
#[must_use]
pub fn sample_source() -> RequirementSource {
    RequirementSource::new(
        "PROJ-101",
        "Track customer tier and renewal date on accounts; tier is mandatory.",
    )
}

/// Staging and production targets plus timings small enough for tests.
///
/// Retries and polls still sleep; tests pause tokio time to skip them.
#[must_use]
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_retry(
            RetryConfig::new()
                .with_max_retries(2)
                .with_initial_delay_ms(10)
                .with_max_delay_ms(50)
                .with_jitter(0.0),
        )
        .with_run_log_retry(
            RetryConfig::new()
                .with_max_retries(2)
                .with_initial_delay_ms(5)
                .with_max_delay_ms(20)
                .with_jitter(0.0),
        )
        .with_circuit_breaker(CircuitBreakerConfig::new(5, 1_000, 1))
        .with_poll(PollOptions::new(5, 10))
        .with_rollback_poll(PollOptions::new(5, 10))
        .with_target(TargetSystem::staging(STAGING_TARGET, "Staging"))
        .with_target(TargetSystem::production(PRODUCTION_TARGET, "Production"))
}

/// Builds an orchestrator over `extractor` and `gateway` with
/// [`test_config`] and the default generator and run log.
///
/// # Errors
///
/// Returns the builder's configuration error.
pub fn orchestrator_with(
    extractor: Arc<dyn RequirementExtractor>,
    gateway: Arc<dyn DeploymentGateway>,
) -> Result<Orchestrator, DeployError> {
    OrchestratorBuilder::new()
        .config(test_config())
        .extractor(extractor)
        .gateway(gateway)
        .build()
}

/// An orchestrator wired to fakes the test can inspect.
pub struct TestHarness {
    /// The orchestrator under test.
    pub orchestrator: Orchestrator,
    /// The fake target system.
    pub gateway: Arc<FakeGateway>,
    /// The run log the orchestrator writes to.
    pub run_log: Arc<InMemoryRunLog>,
    /// Every event the orchestrator emitted.
    pub events: Arc<CollectingEventSink>,
}

impl TestHarness {
    /// A harness whose extractor always answers with `requirements`.
    ///
    /// # Errors
    ///
    /// Returns the builder's configuration error.
    pub fn new(requirements: ExtractedRequirements) -> Result<Self, DeployError> {
        Self::build(
            test_config(),
            Arc::new(StaticExtractor::new(requirements)),
            None,
        )
    }

    /// A harness with a custom configuration, extractor and generator.
    ///
    /// # Errors
    ///
    /// Returns the builder's configuration error.
    pub fn build(
        config: OrchestratorConfig,
        extractor: Arc<dyn RequirementExtractor>,
        generator: Option<Arc<dyn MetadataGenerator>>,
    ) -> Result<Self, DeployError> {
        let gateway = Arc::new(FakeGateway::new());
        let run_log = Arc::new(InMemoryRunLog::new());
        let events = Arc::new(CollectingEventSink::new());

        let mut builder = OrchestratorBuilder::new()
            .config(config)
            .extractor(extractor)
            .gateway(gateway.clone())
            .run_log(run_log.clone())
            .event_sink(events.clone());
        if let Some(generator) = generator {
            builder = builder.generator(generator);
        }

        Ok(Self {
            orchestrator: builder.build()?,
            gateway,
            run_log,
            events,
        })
    }

    /// Run options for [`sample_source`] against the staging target.
    #[must_use]
    pub fn options(&self) -> RunOptions {
        RunOptions::new(sample_source(), STAGING_TARGET)
    }

    /// Loads a run and its steps.
    ///
    /// # Errors
    ///
    /// Returns the run log's error.
    pub async fn run_record(&self, run_id: Uuid) -> Result<RunWithSteps, DeployError> {
        Ok(self.run_log.get_run(run_id).await?)
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("gateway", &self.gateway)
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}
