//! Testing utilities for deployflow pipelines.
//!
//! This module provides:
//! - Scriptable fakes for the extractor, generator, gateway and run log
//! - Fixtures and a harness wiring an orchestrator to those fakes
//! - Assertions over run results and audit trails

mod assertions;
mod fakes;
mod fixtures;

pub use assertions::{
    assert_all_steps_completed, assert_run_status, assert_step_failed, assert_step_sequence,
    assert_warning_contains,
};
pub use fakes::{FakeGateway, FlakyRunLog, ScriptedGenerator, StaticExtractor};
pub use fixtures::{
    orchestrator_with, sample_requirements, sample_source, test_config, TestHarness,
    PRODUCTION_TARGET, STAGING_TARGET,
};
