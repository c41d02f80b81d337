//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::core::{DeployOptions, PollOptions, TargetRegistry, TargetSystem};
use crate::errors::DeployError;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Everything an [`Orchestrator`](crate::orchestrator::Orchestrator) needs
/// besides its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retry policy for gateway calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Retry policy for run log writes.
    #[serde(default = "default_run_log_retry")]
    pub run_log_retry: RetryConfig,
    /// Thresholds shared by the gateway breakers.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Status polling after a deploy.
    #[serde(default)]
    pub poll: PollOptions,
    /// Status polling after a rollback.
    #[serde(default)]
    pub rollback_poll: PollOptions,
    /// Maximum concurrent component lookups during verification.
    #[serde(default = "default_verify_concurrency")]
    pub verify_concurrency: usize,
    /// Metadata API version stamped on packages.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Options sent with every deploy.
    #[serde(default)]
    pub deploy: DeployOptions,
    /// Known target systems.
    #[serde(default)]
    pub targets: Vec<TargetSystem>,
}

fn default_run_log_retry() -> RetryConfig {
    RetryConfig::default()
        .with_initial_delay_ms(200)
        .with_max_delay_ms(2_000)
}

fn default_verify_concurrency() -> usize {
    8
}

fn default_api_version() -> String {
    "59.0".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            run_log_retry: default_run_log_retry(),
            circuit_breaker: CircuitBreakerConfig::default(),
            poll: PollOptions::default(),
            rollback_poll: PollOptions::default(),
            verify_concurrency: default_verify_concurrency(),
            api_version: default_api_version(),
            deploy: DeployOptions::default(),
            targets: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, DeployError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DeployError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), DeployError> {
        self.retry.validate().map_err(DeployError::Configuration)?;
        self.run_log_retry
            .validate()
            .map_err(|e| DeployError::Configuration(format!("run_log_{e}")))?;
        self.circuit_breaker
            .validate()
            .map_err(DeployError::Configuration)?;

        if self.verify_concurrency == 0 {
            return Err(DeployError::Configuration(
                "verify_concurrency must be at least 1".to_string(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(DeployError::Configuration(
                "api_version must not be empty".to_string(),
            ));
        }
        let mut ids = HashSet::new();
        for target in &self.targets {
            if !ids.insert(target.id.as_str()) {
                return Err(DeployError::Configuration(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
        }
        Ok(())
    }

    /// Builds the target registry.
    #[must_use]
    pub fn registry(&self) -> TargetRegistry {
        TargetRegistry::new(self.targets.clone())
    }

    /// Sets the gateway retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the run log retry policy.
    #[must_use]
    pub fn with_run_log_retry(mut self, retry: RetryConfig) -> Self {
        self.run_log_retry = retry;
        self
    }

    /// Sets the breaker thresholds.
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Sets deploy polling.
    #[must_use]
    pub fn with_poll(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    /// Sets rollback polling.
    #[must_use]
    pub fn with_rollback_poll(mut self, poll: PollOptions) -> Self {
        self.rollback_poll = poll;
        self
    }

    /// Sets verification fan-out.
    #[must_use]
    pub fn with_verify_concurrency(mut self, concurrency: usize) -> Self {
        self.verify_concurrency = concurrency;
        self
    }

    /// Adds a target system.
    #[must_use]
    pub fn with_target(mut self, target: TargetSystem) -> Self {
        self.targets.push(target);
        self
    }
}
