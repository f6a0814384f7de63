//! Test doubles for the collaborators the orchestration core consumes

use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand_core::models::{Execution, ExecutionStatus, Stage};
use stagehand_core::orchestration::{
    ExecutionRunner, InMemoryStartTracker, OrchestrationError, OrchestrationResult, StartTracker, StartedExecution,
};
use stagehand_core::persistence::{
    ExecutionRepository, InMemoryExecutionRepository, PersistenceError, PersistenceResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Records every execution handed to the executor
#[derive(Debug, Default)]
pub struct RecordingRunner {
    started: Mutex<Vec<Execution>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_ids(&self) -> Vec<String> {
        self.started.lock().iter().map(|execution| execution.id.clone()).collect()
    }

    pub fn last_started(&self) -> Option<Execution> {
        self.started.lock().last().cloned()
    }
}

#[async_trait]
impl ExecutionRunner for RecordingRunner {
    async fn start(&self, execution: &Execution) -> OrchestrationResult<()> {
        self.started.lock().push(execution.clone());
        Ok(())
    }
}

pub struct FailingRunner;

#[async_trait]
impl ExecutionRunner for FailingRunner {
    async fn start(&self, execution: &Execution) -> OrchestrationResult<()> {
        Err(OrchestrationError::Runner {
            execution_id: execution.id.clone(),
            reason: "executor unavailable".to_string(),
        })
    }
}

/// In-memory repository whose `store_stage` starts failing after a number
/// of successful writes
pub struct FlakyRepository {
    inner: InMemoryExecutionRepository,
    stage_writes_before_failure: AtomicUsize,
}

impl FlakyRepository {
    pub fn failing_after(stage_writes: usize) -> Self {
        Self {
            inner: InMemoryExecutionRepository::new(),
            stage_writes_before_failure: AtomicUsize::new(stage_writes),
        }
    }
}

#[async_trait]
impl ExecutionRepository for FlakyRepository {
    async fn store(&self, execution: &Execution) -> PersistenceResult<()> {
        self.inner.store(execution).await
    }

    async fn store_stage(&self, execution_id: &str, stage: &Stage) -> PersistenceResult<()> {
        let remaining = self.stage_writes_before_failure.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(PersistenceError::Backend("connection reset".to_string()));
        }
        self.stage_writes_before_failure.store(remaining - 1, Ordering::SeqCst);
        self.inner.store_stage(execution_id, stage).await
    }

    async fn retrieve(&self, execution_id: &str) -> PersistenceResult<Execution> {
        self.inner.retrieve(execution_id).await
    }

    async fn cancel(&self, execution_id: &str, user: Option<&str>, reason: Option<&str>) -> PersistenceResult<()> {
        self.inner.cancel(execution_id, user, reason).await
    }

    async fn resume(&self, execution_id: &str, user: &str, ignore_current_status: bool) -> PersistenceResult<()> {
        self.inner.resume(execution_id, user, ignore_current_status).await
    }

    async fn update_status(&self, execution_id: &str, status: ExecutionStatus) -> PersistenceResult<()> {
        self.inner.update_status(execution_id, status).await
    }
}

/// Start tracker that reports a lost admission race a fixed number of times
/// before delegating to the in-memory tracker
pub struct RacyStartTracker {
    inner: InMemoryStartTracker,
    races_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl RacyStartTracker {
    pub fn new(races: usize) -> Self {
        Self {
            inner: InMemoryStartTracker::new(),
            races_remaining: AtomicUsize::new(races),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StartTracker for RacyStartTracker {
    async fn queue_if_not_started(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let raced = self
            .races_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok();
        if raced {
            return Err(OrchestrationError::AdmissionRaceDetected {
                pipeline_config_id: pipeline_config_id.to_string(),
                execution_id: execution_id.to_string(),
            });
        }
        self.inner.queue_if_not_started(pipeline_config_id, execution_id).await
    }

    async fn add_to_started(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<()> {
        self.inner.add_to_started(pipeline_config_id, execution_id).await
    }

    async fn mark_as_finished(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<()> {
        self.inner.mark_as_finished(pipeline_config_id, execution_id).await
    }

    async fn all_started(&self) -> OrchestrationResult<Vec<StartedExecution>> {
        self.inner.all_started().await
    }

    async fn started_executions(&self, pipeline_config_id: &str) -> OrchestrationResult<Vec<String>> {
        self.inner.started_executions(pipeline_config_id).await
    }

    async fn queued_executions(&self, pipeline_config_id: &str) -> OrchestrationResult<Vec<String>> {
        self.inner.queued_executions(pipeline_config_id).await
    }

    async fn remove_from_queue(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool> {
        self.inner.remove_from_queue(pipeline_config_id, execution_id).await
    }

    async fn promote(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool> {
        self.inner.promote(pipeline_config_id, execution_id).await
    }
}
