//! Requirement extraction and unit generation boundaries.

mod standard;
pub mod validation;

pub use standard::{derive_api_name, StandardMetadataGenerator};
pub use validation::{validate_unit, validate_units};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{ExtractedRequirements, FieldRequirement, GeneratedUnit, RuleRequirement};
use crate::errors::DeployError;

/// Turns free text into structured requirements.
#[async_trait]
pub trait RequirementExtractor: Send + Sync {
    /// Extracts requirements from `text`.
    async fn parse(&self, text: &str) -> Result<ExtractedRequirements, DeployError>;
}

/// A field requirement with its resolved owning container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequest {
    /// The requirement.
    pub requirement: FieldRequirement,
    /// Container the field is created on.
    pub container: String,
}

/// A rule requirement with its resolved owning container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRequest {
    /// The requirement.
    pub requirement: RuleRequirement,
    /// Container the rule is created on.
    pub container: String,
}

/// Result of validating a batch of units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when `errors` is empty.
    pub is_valid: bool,
    /// Failures, prefixed with the offending unit's name.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Builds a report from a list of failures.
    #[must_use]
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Synthesizes deployable units from requirements.
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    /// Generates a field unit.
    async fn generate_field(&self, request: &FieldRequest) -> Result<GeneratedUnit, DeployError>;

    /// Generates a validation-rule unit.
    async fn generate_rule(&self, request: &RuleRequest) -> Result<GeneratedUnit, DeployError>;

    /// Validates a batch of units. Defaults to the local validator.
    async fn validate(&self, units: &[GeneratedUnit]) -> ValidationReport {
        validate_units(units)
    }
}
