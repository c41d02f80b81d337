//! Orchestrator builder.

use std::sync::Arc;

use super::runner::Orchestrator;
use crate::config::OrchestratorConfig;
use crate::errors::DeployError;
use crate::events::{noop_sink, SharedEventSink};
use crate::gateway::{DeploymentGateway, GatewayBreakers, ResilientGateway};
use crate::generation::{MetadataGenerator, RequirementExtractor, StandardMetadataGenerator};
use crate::resilience::{RetryAttempt, RetryHandler, RetryObserver};
use crate::runlog::{InMemoryRunLog, RunLog};

/// Assembles an [`Orchestrator`] from its collaborators.
///
/// The extractor and the gateway are required. The generator defaults to
/// [`StandardMetadataGenerator`] and the run log to [`InMemoryRunLog`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    extractor: Option<Arc<dyn RequirementExtractor>>,
    generator: Option<Arc<dyn MetadataGenerator>>,
    gateway: Option<Arc<dyn DeploymentGateway>>,
    run_log: Option<Arc<dyn RunLog>>,
    breakers: Option<GatewayBreakers>,
    sink: Option<SharedEventSink>,
    on_retry: Option<RetryObserver>,
}

impl OrchestratorBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the requirement extractor.
    #[must_use]
    pub fn extractor(mut self, extractor: Arc<dyn RequirementExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Sets the metadata generator.
    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn MetadataGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Sets the deployment gateway.
    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn DeploymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Sets the run log.
    #[must_use]
    pub fn run_log(mut self, run_log: Arc<dyn RunLog>) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Shares breakers with other orchestrators.
    #[must_use]
    pub fn breakers(mut self, breakers: GatewayBreakers) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Sets the event sink used by the orchestrator, the retry handlers
    /// and any breakers the builder creates.
    #[must_use]
    pub fn event_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Observes every scheduled gateway retry.
    #[must_use]
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryAttempt) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a required collaborator is
    /// missing or the configuration is invalid.
    pub fn build(self) -> Result<Orchestrator, DeployError> {
        self.config.validate()?;

        let extractor = self.extractor.ok_or_else(|| {
            DeployError::Configuration("a requirement extractor is required".to_string())
        })?;
        let gateway = self.gateway.ok_or_else(|| {
            DeployError::Configuration("a deployment gateway is required".to_string())
        })?;
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(StandardMetadataGenerator::new()));
        let run_log = self
            .run_log
            .unwrap_or_else(|| Arc::new(InMemoryRunLog::new()));
        let sink = self.sink.unwrap_or_else(noop_sink);

        let breakers = self
            .breakers
            .unwrap_or_else(|| GatewayBreakers::new(self.config.circuit_breaker, &sink));
        let mut retry = RetryHandler::new(self.config.retry.clone()).with_sink(sink.clone());
        if let Some(observer) = self.on_retry {
            retry = retry.with_observer(move |attempt| observer(attempt));
        }
        let log_retry =
            RetryHandler::new(self.config.run_log_retry.clone()).with_sink(sink.clone());

        Ok(Orchestrator {
            extractor,
            generator,
            gateway: ResilientGateway::new(gateway, retry, breakers),
            run_log,
            log_retry,
            targets: self.config.registry(),
            config: self.config,
            sink,
        })
    }
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("has_extractor", &self.extractor.is_some())
            .field("has_gateway", &self.gateway.is_some())
            .finish_non_exhaustive()
    }
}
