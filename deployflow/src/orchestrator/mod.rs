//! Pipeline orchestration.
//!
//! A run moves through PARSE, GENERATE, VALIDATE, DEPLOY and VERIFY, each
//! recorded as an audit step before the next one starts. A dry run stops
//! after VALIDATE. A deployment that fails verification, or a run that is
//! cancelled after its package went out, is compensated by a rollback that
//! removes exactly the submitted components.

mod builder;
mod options;
mod result;
mod rollback;
mod runner;
mod scenario_tests;

pub use builder::OrchestratorBuilder;
pub use options::RunOptions;
pub use result::{AutomationResult, RunMetadata, RunWarning};
pub use runner::Orchestrator;
