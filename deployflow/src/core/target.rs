//! Target systems and production-to-staging redirection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::DeployError;

/// Environment class of a target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Live system.
    Production,
    /// Pre-production system used in place of production.
    Staging,
    /// Isolated copy.
    Sandbox,
    /// Developer system.
    Development,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Staging => write!(f, "staging"),
            Self::Sandbox => write!(f, "sandbox"),
            Self::Development => write!(f, "development"),
        }
    }
}

/// A system deployments can be sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSystem {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Environment class.
    pub environment: Environment,
    /// Endpoint the gateway talks to.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl TargetSystem {
    /// Creates a target.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, environment: Environment) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            environment,
            endpoint: None,
        }
    }

    /// Creates a production target.
    #[must_use]
    pub fn production(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, Environment::Production)
    }

    /// Creates a staging target.
    #[must_use]
    pub fn staging(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, Environment::Staging)
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Returns true for production-class targets.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

/// Outcome of resolving a target reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResolution {
    /// The target to deploy to.
    pub target: TargetSystem,
    /// The production target that was requested, when redirected.
    pub redirected_from: Option<TargetSystem>,
}

/// Registered target systems.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<TargetSystem>,
}

impl TargetRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(targets: Vec<TargetSystem>) -> Self {
        Self { targets }
    }

    /// Looks a target up by id, then by name.
    #[must_use]
    pub fn get(&self, reference: &str) -> Option<&TargetSystem> {
        self.targets
            .iter()
            .find(|t| t.id == reference)
            .or_else(|| self.targets.iter().find(|t| t.name == reference))
    }

    /// The first registered staging-class target.
    #[must_use]
    pub fn staging(&self) -> Option<&TargetSystem> {
        self.targets
            .iter()
            .find(|t| t.environment == Environment::Staging)
    }

    /// Resolves `reference` to the system that will actually receive the
    /// deployment.
    ///
    /// Production targets are redirected to staging unless
    /// `force_production` is set.
    pub fn resolve(
        &self,
        reference: &str,
        force_production: bool,
    ) -> Result<TargetResolution, DeployError> {
        let requested = self.get(reference).ok_or_else(|| {
            DeployError::Configuration(format!("unknown target system '{reference}'"))
        })?;

        if !requested.is_production() || force_production {
            return Ok(TargetResolution {
                target: requested.clone(),
                redirected_from: None,
            });
        }

        let staging = self.staging().ok_or_else(|| {
            DeployError::Configuration(format!(
                "target '{}' is production and no staging target is registered",
                requested.name
            ))
        })?;

        Ok(TargetResolution {
            target: staging.clone(),
            redirected_from: Some(requested.clone()),
        })
    }

    /// All registered targets.
    #[must_use]
    pub fn targets(&self) -> &[TargetSystem] {
        &self.targets
    }
}
