//! Assertions over run results and audit trails.

use crate::core::{RunStatus, RunWithSteps, StepStatus, StepType};
use crate::orchestrator::AutomationResult;

/// Asserts the result's terminal status.
pub fn assert_run_status(result: &AutomationResult, expected: RunStatus) {
    assert_eq!(
        result.status, expected,
        "Expected run status {:?}, got {:?} (errors: {:?})",
        expected, result.status, result.errors
    );
}

/// Asserts the step types of a run, in audit order.
pub fn assert_step_sequence(run: &RunWithSteps, expected: &[StepType]) {
    assert_eq!(
        run.step_types(),
        expected,
        "Unexpected step sequence for run {}",
        run.run.id
    );
}

/// Asserts that every step of a run completed.
pub fn assert_all_steps_completed(run: &RunWithSteps) {
    for step in &run.steps {
        assert_eq!(
            step.status,
            StepStatus::Completed,
            "Step {} ({}) is {}",
            step.id,
            step.step_type,
            step.status
        );
    }
}

/// Asserts that the last step of `step_type` failed.
pub fn assert_step_failed(run: &RunWithSteps, step_type: StepType) {
    let step = run.steps_of(step_type).last();
    assert!(
        matches!(step, Some(s) if s.status == StepStatus::Failed),
        "Expected a failed {step_type} step, got {:?}",
        step.map(|s| s.status)
    );
}

/// Asserts that some warning contains `text`.
pub fn assert_warning_contains(result: &AutomationResult, text: &str) {
    assert!(
        result.has_warning(text),
        "Expected a warning containing '{text}', got {:?}",
        result.warning_messages()
    );
}
