//! Core domain model types for deployflow.
//!
//! This module contains the data shared by every stage of a run:
//! - Run, step and deployment status enums
//! - Extracted requirements and the units generated from them
//! - Deployment packages, descriptors and gateway reports
//! - Target systems and the registry that resolves them

mod deployment;
mod requirement;
mod run;
mod status;
mod target;
mod unit;

pub use deployment::{
    ComponentDescriptor, DeployOptions, DeploymentDescriptor, DeploymentDetails,
    DeploymentPackage, ManifestEntry, PackageKind, PollOptions, PollOutcome, StatusReport,
};
pub use requirement::{
    ExtractedRequirements, FieldRequirement, FieldType, RequirementSource, RuleRequirement,
};
pub use run::{AutomationRun, AutomationStep, RunCompletion, RunWithSteps, StepRecord};
pub use status::{DeploymentStatus, RunStatus, StepStatus, StepType};
pub use target::{Environment, TargetRegistry, TargetResolution, TargetSystem};
pub use unit::{
    ComponentKind, FieldDefinition, FieldUnit, GeneratedUnit, UnitValidity,
    ValidationRuleDefinition, ValidationRuleUnit,
};
