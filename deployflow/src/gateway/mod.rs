//! The deployment gateway boundary and its resilient wrapper.

mod resilient;

pub use resilient::{GatewayBreakers, ResilientGateway, VerificationReport};

use async_trait::async_trait;

use crate::core::{
    ComponentDescriptor, ComponentKind, DeployOptions, DeploymentDetails, DeploymentPackage,
    StatusReport, TargetSystem,
};
use crate::errors::GatewayError;

/// Client for the external configuration-management system.
///
/// Implementations report transport failures as [`GatewayError`]; retry
/// and circuit breaking are layered on by [`ResilientGateway`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentGateway: Send + Sync {
    /// Submits a package and returns the external deployment id.
    async fn deploy(
        &self,
        target: &TargetSystem,
        package: &DeploymentPackage,
        options: &DeployOptions,
    ) -> Result<String, GatewayError>;

    /// Checks a deployment's status once.
    async fn check_status(
        &self,
        target: &TargetSystem,
        deployment_id: &str,
    ) -> Result<StatusReport, GatewayError>;

    /// Looks a component up on the target. `Ok(None)` means it does not exist.
    async fn describe_component(
        &self,
        target: &TargetSystem,
        kind: ComponentKind,
        full_name: &str,
    ) -> Result<Option<ComponentDescriptor>, GatewayError>;

    /// Lists what a finished deployment touched.
    async fn get_deployment_details(
        &self,
        target: &TargetSystem,
        deployment_id: &str,
    ) -> Result<DeploymentDetails, GatewayError>;
}
