//! Retry → circuit breaker → gateway composition.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::DeploymentGateway;
use crate::core::{
    ComponentDescriptor, ComponentKind, DeployOptions, DeploymentDetails, DeploymentPackage,
    DeploymentStatus, PollOptions, PollOutcome, StatusReport, TargetSystem,
};
use crate::errors::{DeployError, GatewayError};
use crate::events::SharedEventSink;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, OperationClass, RetryHandler};

/// One breaker per gateway operation class.
///
/// Cloning shares the breakers, so every run built from the same
/// `GatewayBreakers` sees the same state.
#[derive(Debug, Clone)]
pub struct GatewayBreakers {
    /// Guards package submission.
    pub deploy: Arc<CircuitBreaker>,
    /// Guards status checks and deployment details.
    pub status: Arc<CircuitBreaker>,
    /// Guards component lookups.
    pub describe: Arc<CircuitBreaker>,
}

impl GatewayBreakers {
    /// Creates closed breakers sharing one configuration and sink.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, sink: &SharedEventSink) -> Self {
        let build = |class| Arc::new(CircuitBreaker::new(class, config).with_sink(sink.clone()));
        Self {
            deploy: build(OperationClass::Deploy),
            status: build(OperationClass::Status),
            describe: build(OperationClass::Describe),
        }
    }

    /// The breaker for `class`.
    #[must_use]
    pub fn get(&self, class: OperationClass) -> &CircuitBreaker {
        match class {
            OperationClass::Deploy => &self.deploy,
            OperationClass::Status => &self.status,
            OperationClass::Describe => &self.describe,
        }
    }

    /// Closes every breaker.
    pub fn reset_all(&self) {
        self.deploy.reset();
        self.status.reset();
        self.describe.reset();
    }
}

/// Aggregated result of looking up deployed components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Components found on the target, in request order.
    pub verified: Vec<String>,
    /// Components not found or not checkable, in request order.
    pub missing: Vec<String>,
    /// Lookup failures, as `name: error`.
    pub errors: Vec<String>,
}

impl VerificationReport {
    /// Returns true when every component was found.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A [`DeploymentGateway`] with every call routed through the retry handler
/// and the breaker for its operation class.
pub struct ResilientGateway {
    inner: Arc<dyn DeploymentGateway>,
    retry: RetryHandler,
    breakers: GatewayBreakers,
}

impl ResilientGateway {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(
        inner: Arc<dyn DeploymentGateway>,
        retry: RetryHandler,
        breakers: GatewayBreakers,
    ) -> Self {
        Self {
            inner,
            retry,
            breakers,
        }
    }

    /// The shared breakers.
    #[must_use]
    pub fn breakers(&self) -> &GatewayBreakers {
        &self.breakers
    }

    async fn call<T, F, Fut>(
        &self,
        operation: &str,
        class: OperationClass,
        f: F,
    ) -> Result<T, DeployError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.breakers.get(class);
        let f = &f;
        self.retry
            .execute(operation, move || {
                breaker.execute(move || async move { f().await.map_err(DeployError::from) })
            })
            .await
    }

    /// Submits a package.
    pub async fn submit(
        &self,
        target: &TargetSystem,
        package: &DeploymentPackage,
        options: &DeployOptions,
    ) -> Result<String, DeployError> {
        let gateway = self.inner.as_ref();
        self.call("deploy", OperationClass::Deploy, || {
            gateway.deploy(target, package, options)
        })
        .await
    }

    /// Checks a deployment's status once.
    pub async fn check_status(
        &self,
        target: &TargetSystem,
        deployment_id: &str,
    ) -> Result<StatusReport, DeployError> {
        let gateway = self.inner.as_ref();
        self.call("check_status", OperationClass::Status, || {
            gateway.check_status(target, deployment_id)
        })
        .await
    }

    /// Polls until the deployment reaches a terminal status or the poll
    /// budget runs out.
    ///
    /// Each check is individually resilient. Running out of polls is not an
    /// error; it yields an unsuccessful outcome.
    pub async fn poll_status(
        &self,
        target: &TargetSystem,
        deployment_id: &str,
        options: &PollOptions,
    ) -> Result<PollOutcome, DeployError> {
        let max_polls = options.max_polls.max(1);
        let mut last = DeploymentStatus::Pending;

        for poll in 1..=max_polls {
            let report = self.check_status(target, deployment_id).await?;
            debug!(deployment_id, poll, status = %report.status, "Polled deployment");
            last = report.status;

            if report.status.is_terminal() {
                let success = report.status.is_success();
                let error_message = if success {
                    None
                } else {
                    Some(report.failure_message().unwrap_or_else(|| {
                        format!("Deployment finished with status {}", report.status)
                    }))
                };
                return Ok(PollOutcome {
                    success,
                    status: report.status,
                    error_message,
                    polls: poll,
                });
            }

            if poll < max_polls {
                tokio::time::sleep(options.interval()).await;
            }
        }

        Ok(PollOutcome {
            success: false,
            status: last,
            error_message: Some(format!(
                "Deployment {deployment_id} did not finish within {max_polls} status checks (last status {last})"
            )),
            polls: max_polls,
        })
    }

    /// Looks a component up.
    pub async fn describe_component(
        &self,
        target: &TargetSystem,
        kind: ComponentKind,
        full_name: &str,
    ) -> Result<Option<ComponentDescriptor>, DeployError> {
        let gateway = self.inner.as_ref();
        self.call("describe_component", OperationClass::Describe, || {
            gateway.describe_component(target, kind, full_name)
        })
        .await
    }

    /// Lists what a deployment touched.
    pub async fn get_deployment_details(
        &self,
        target: &TargetSystem,
        deployment_id: &str,
    ) -> Result<DeploymentDetails, DeployError> {
        let gateway = self.inner.as_ref();
        self.call("get_deployment_details", OperationClass::Status, || {
            gateway.get_deployment_details(target, deployment_id)
        })
        .await
    }

    /// Looks every component up with at most `concurrency` lookups in
    /// flight. Results keep the order of `components`.
    pub async fn verify_components(
        &self,
        target: &TargetSystem,
        components: &[ComponentDescriptor],
        concurrency: usize,
    ) -> VerificationReport {
        let lookups: Vec<_> = stream::iter(components)
            .map(|component| async move {
                let found = self
                    .describe_component(target, component.kind, &component.full_name)
                    .await;
                (component, found)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut report = VerificationReport::default();
        for (component, found) in lookups {
            let name = component.full_name.clone();
            match found {
                Ok(Some(_)) => report.verified.push(name),
                Ok(None) => report.missing.push(name),
                Err(err) => {
                    report.errors.push(format!("{name}: {err}"));
                    report.missing.push(name);
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for ResilientGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientGateway")
            .field("retry", &self.retry)
            .field("breakers", &self.breakers)
            .finish_non_exhaustive()
    }
}
