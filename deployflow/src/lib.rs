//! # Deployflow
//!
//! Turns natural-language change requests into configuration components and
//! deploys them to a target system as a saga with compensating rollback.
//!
//! A run moves through fixed stages:
//!
//! - **Parse**: extract structured requirements from the request text
//! - **Generate**: build one deployable unit per requirement
//! - **Validate**: reject the batch before anything leaves the process
//! - **Deploy**: submit the package and poll until it finishes
//! - **Verify**: look every component up on the target
//!
//! A deployment that cannot be verified is rolled back by removing exactly
//! the components it added. Every gateway call goes through a retry handler
//! and a circuit breaker shared across runs, and every stage is recorded in
//! a run log.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .config(OrchestratorConfig::from_file("deployflow.json")?)
//!     .extractor(extractor)
//!     .gateway(gateway)
//!     .build()?;
//!
//! let result = orchestrator
//!     .run(RunOptions::new(RequirementSource::new("PROJ-101", text), "staging"))
//!     .await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod generation;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod runlog;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::OrchestratorConfig;
    pub use crate::core::{
        ComponentDescriptor, ComponentKind, DeployOptions, DeploymentDetails, DeploymentPackage,
        DeploymentStatus, ExtractedRequirements, FieldRequirement, FieldType, GeneratedUnit,
        PollOptions, RequirementSource, RuleRequirement, RunStatus, StatusReport, StepStatus,
        StepType, TargetSystem,
    };
    pub use crate::errors::{DeployError, GatewayError, ValidationError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::gateway::{DeploymentGateway, GatewayBreakers};
    pub use crate::generation::{
        MetadataGenerator, RequirementExtractor, StandardMetadataGenerator,
    };
    pub use crate::observability::init_tracing;
    pub use crate::orchestrator::{
        AutomationResult, Orchestrator, OrchestratorBuilder, RunOptions, RunWarning,
    };
    pub use crate::resilience::{CircuitBreakerConfig, RetryConfig};
    pub use crate::runlog::{InMemoryRunLog, RunLog};
}
