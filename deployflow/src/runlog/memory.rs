//! In-memory run log.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{RunLog, RunLogError};
use crate::core::{
    AutomationRun, AutomationStep, RunCompletion, RunStatus, RunWithSteps, StepRecord,
};

#[derive(Debug, Clone)]
struct RunEntry {
    run: AutomationRun,
    steps: Vec<AutomationStep>,
    next_sequence: u64,
}

/// A [`RunLog`] kept in a concurrent map.
///
/// Each run is one map entry, so writes to different runs never contend.
#[derive(Debug, Default)]
pub struct InMemoryRunLog {
    runs: DashMap<Uuid, RunEntry>,
}

impl InMemoryRunLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no run was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

fn apply_step(
    entry: &mut RunEntry,
    run_id: Uuid,
    record: &StepRecord,
) -> Result<(), RunLogError> {
    let now = Utc::now();
    let Some(step) = entry.steps.iter_mut().find(|s| s.id == record.step_id) else {
        let sequence = entry.next_sequence;
        entry.next_sequence += 1;
        entry.steps.push(AutomationStep {
            id: record.step_id,
            run_id,
            step_type: record.step_type,
            status: record.status,
            input: record.input.clone(),
            output: record.output.clone(),
            error: record.error.clone(),
            started_at: now,
            completed_at: record.status.is_terminal().then_some(now),
            sequence,
        });
        return Ok(());
    };

    if step.step_type != record.step_type {
        return Err(RunLogError::InvalidTransition(format!(
            "step {} is {} and cannot be rewritten as {}",
            step.id, step.step_type, record.step_type
        )));
    }
    if step.status == record.status {
        return Ok(());
    }
    if step.status.is_terminal() {
        return Err(RunLogError::StepFinalized {
            run_id,
            step_id: step.id,
            status: step.status,
        });
    }

    step.status = record.status;
    step.output = record.output.clone();
    step.error = record.error.clone();
    step.completed_at = Some(now);
    Ok(())
}

#[async_trait]
impl RunLog for InMemoryRunLog {
    async fn create_run(&self, source_ref: &str) -> Result<Uuid, RunLogError> {
        let run = AutomationRun::new(source_ref);
        let id = run.id;
        self.runs.insert(
            id,
            RunEntry {
                run,
                steps: Vec::new(),
                next_sequence: 0,
            },
        );
        Ok(id)
    }

    async fn record_step(&self, run_id: Uuid, step: &StepRecord) -> Result<(), RunLogError> {
        let mut entry = self
            .runs
            .get_mut(&run_id)
            .ok_or(RunLogError::RunNotFound(run_id))?;
        if entry.run.status.is_terminal() {
            return Err(RunLogError::RunFinalized {
                run_id,
                status: entry.run.status,
            });
        }
        apply_step(&mut entry, run_id, step)
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        completion: &RunCompletion,
    ) -> Result<(), RunLogError> {
        if completion.status == RunStatus::Running {
            return Err(RunLogError::InvalidTransition(
                "a run cannot be completed as RUNNING".to_string(),
            ));
        }
        let mut entry = self
            .runs
            .get_mut(&run_id)
            .ok_or(RunLogError::RunNotFound(run_id))?;
        let run = &mut entry.run;

        if run.status == completion.status {
            return Ok(());
        }
        if run.status.is_terminal() {
            return Err(RunLogError::RunFinalized {
                run_id,
                status: run.status,
            });
        }

        run.status = completion.status;
        run.result_metadata = completion.metadata.clone();
        run.error = completion.error.clone();
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<RunWithSteps, RunLogError> {
        let entry = self
            .runs
            .get(&run_id)
            .ok_or(RunLogError::RunNotFound(run_id))?;
        let mut steps = entry.steps.clone();
        steps.sort_by_key(|step| step.sequence);
        Ok(RunWithSteps {
            run: entry.run.clone(),
            steps,
        })
    }

    async fn list_runs(&self, source_ref: &str) -> Result<Vec<AutomationRun>, RunLogError> {
        let mut runs: Vec<AutomationRun> = self
            .runs
            .iter()
            .filter(|entry| entry.run.source_ref == source_ref)
            .map(|entry| entry.run.clone())
            .collect();
        runs.sort_by_key(|run| run.started_at);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepStatus, StepType};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_step_lifecycle_is_idempotent() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-42").await.unwrap();
        let running = StepRecord::running(StepType::Parse, json!({"text": "add a field"}));
        let completed = running.clone().completed(json!({"requirements": 1}));

        log.record_step(run_id, &running).await.unwrap();
        log.record_step(run_id, &running).await.unwrap();
        log.record_step(run_id, &completed).await.unwrap();
        log.record_step(run_id, &completed).await.unwrap();

        let stored = log.get_run(run_id).await.unwrap();
        assert_eq!(stored.steps.len(), 1);
        assert_eq!(stored.steps[0].status, StepStatus::Completed);
        assert_eq!(stored.steps[0].output["requirements"], 1);
        assert!(stored.steps[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_step_cannot_change() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-42").await.unwrap();
        let running = StepRecord::running(StepType::Deploy, json!({}));
        log.record_step(run_id, &running.clone().completed(json!({})))
            .await
            .unwrap();

        let err = log
            .record_step(run_id, &running.failed(json!({"type": "GatewayError"})))
            .await
            .unwrap_err();

        assert!(matches!(err, RunLogError::StepFinalized { status: StepStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn test_steps_are_returned_in_insertion_order() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-7").await.unwrap();
        for step_type in [StepType::Parse, StepType::Generate, StepType::Validate] {
            let record = StepRecord::running(step_type, json!({})).completed(json!({}));
            log.record_step(run_id, &record).await.unwrap();
        }

        let stored = log.get_run(run_id).await.unwrap();

        assert_eq!(
            stored.step_types(),
            vec![StepType::Parse, StepType::Generate, StepType::Validate]
        );
        assert_eq!(
            stored.steps.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_complete_run_same_status_is_noop() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-9").await.unwrap();
        let success = RunCompletion::new(RunStatus::Success, json!({"units": []}));

        log.complete_run(run_id, &success).await.unwrap();
        log.complete_run(run_id, &success).await.unwrap();
        let err = log
            .complete_run(run_id, &RunCompletion::new(RunStatus::Failed, json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, RunLogError::RunFinalized { status: RunStatus::Success, .. }));
        let stored = log.get_run(run_id).await.unwrap();
        assert_eq!(stored.run.status, RunStatus::Success);
        assert!(stored.run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_as_running_is_rejected() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-9").await.unwrap();

        let err = log
            .complete_run(run_id, &RunCompletion::new(RunStatus::Running, json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, RunLogError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_finished_run_rejects_new_steps() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-9").await.unwrap();
        log.complete_run(run_id, &RunCompletion::new(RunStatus::Failed, json!({})))
            .await
            .unwrap();

        let err = log
            .record_step(run_id, &StepRecord::running(StepType::Deploy, json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, RunLogError::RunFinalized { .. }));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let log = InMemoryRunLog::new();
        let missing = Uuid::new_v4();

        assert_eq!(
            log.get_run(missing).await.unwrap_err(),
            RunLogError::RunNotFound(missing)
        );
    }

    #[tokio::test]
    async fn test_list_runs_filters_by_source() {
        let log = InMemoryRunLog::new();
        let first = log.create_run("PROJ-1").await.unwrap();
        log.create_run("PROJ-2").await.unwrap();
        let second = log.create_run("PROJ-1").await.unwrap();

        let runs = log.list_runs("PROJ-1").await.unwrap();

        assert_eq!(runs.len(), 2);
        let ids: Vec<_> = runs.iter().map(|r| r.id).collect();
        assert!(ids.contains(&first) && ids.contains(&second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_do_not_interfere() {
        let log = Arc::new(InMemoryRunLog::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move {
                    let run_id = log.create_run(&format!("PROJ-{i}")).await.unwrap();
                    for step_type in [StepType::Parse, StepType::Generate] {
                        let record =
                            StepRecord::running(step_type, json!({})).completed(json!({}));
                        log.record_step(run_id, &record).await.unwrap();
                    }
                    run_id
                })
            })
            .collect();

        for handle in handles {
            let run_id = handle.await.unwrap();
            assert_eq!(log.get_run(run_id).await.unwrap().steps.len(), 2);
        }
        assert_eq!(log.len(), 16);
    }

    #[test]
    fn test_writes_to_unknown_run_are_rejected() {
        let log = InMemoryRunLog::new();
        let missing = Uuid::new_v4();
        let step = StepRecord::running(StepType::Parse, json!({}));

        tokio_test::assert_err!(tokio_test::block_on(log.record_step(missing, &step)));
        tokio_test::assert_err!(tokio_test::block_on(
            log.complete_run(missing, &RunCompletion::new(RunStatus::Failed, json!({})))
        ));
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_step_order_ignores_wall_clock() {
        let log = InMemoryRunLog::new();
        let run_id = log.create_run("PROJ-3").await.unwrap();
        for step_type in [StepType::Parse, StepType::Generate, StepType::Validate] {
            let record = StepRecord::running(step_type, json!({})).completed(json!({}));
            log.record_step(run_id, &record).await.unwrap();
        }
        // Simulate the clock stepping backwards after the first write.
        {
            let mut entry = log.runs.get_mut(&run_id).unwrap();
            let first = entry.steps[0].started_at;
            entry.steps[0].started_at = first + chrono::Duration::hours(1);
        }

        let stored = log.get_run(run_id).await.unwrap();

        assert_eq!(
            stored.step_types(),
            vec![StepType::Parse, StepType::Generate, StepType::Validate]
        );
    }
}
