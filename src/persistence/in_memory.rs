//! # In-Memory Execution Repository
//!
//! Thread-safe map-backed [`ExecutionRepository`] for tests and development.
//! Executions are cloned in and out, so callers never share mutable state
//! with the store.

use super::{ExecutionRepository, PersistenceError, PersistenceResult};
use crate::models::{Execution, ExecutionStatus, PausedDetails, Stage};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions (for testing)
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }

    /// All stored executions for one pipeline definition (for testing)
    pub async fn executions_for_config(&self, pipeline_config_id: &str) -> Vec<Execution> {
        self.executions
            .read()
            .await
            .values()
            .filter(|execution| execution.pipeline_config_id.as_deref() == Some(pipeline_config_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn store(&self, execution: &Execution) -> PersistenceResult<()> {
        debug!(execution_id = %execution.id, stages = execution.stages.len(), "Storing execution");
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn store_stage(&self, execution_id: &str, stage: &Stage) -> PersistenceResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| PersistenceError::execution_not_found(execution_id))?;
        let existing = execution.stage_by_id_mut(&stage.id).ok_or_else(|| {
            PersistenceError::StageNotFound {
                execution_id: execution_id.to_string(),
                stage_id: stage.id.clone(),
            }
        })?;

        // The planner-local counter is not persisted, keep whatever the store had
        let counter = existing.stage_counter;
        *existing = stage.clone();
        existing.stage_counter = counter;
        Ok(())
    }

    async fn retrieve(&self, execution_id: &str) -> PersistenceResult<Execution> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| PersistenceError::execution_not_found(execution_id))
    }

    async fn cancel(
        &self,
        execution_id: &str,
        user: Option<&str>,
        reason: Option<&str>,
    ) -> PersistenceResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| PersistenceError::execution_not_found(execution_id))?;

        execution.canceled = true;
        execution.canceled_by = user.map(str::to_string);
        execution.cancellation_reason = reason.map(str::to_string);
        if execution.status == ExecutionStatus::NotStarted {
            execution.status = ExecutionStatus::Canceled;
            execution.end_time = Some(Utc::now());
        }
        Ok(())
    }

    async fn resume(
        &self,
        execution_id: &str,
        user: &str,
        ignore_current_status: bool,
    ) -> PersistenceResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| PersistenceError::execution_not_found(execution_id))?;

        if !ignore_current_status && execution.status != ExecutionStatus::Paused {
            return Err(PersistenceError::InvalidStatus {
                execution_id: execution_id.to_string(),
                status: execution.status,
                expected: ExecutionStatus::Paused,
            });
        }

        let paused = execution.paused.get_or_insert_with(PausedDetails::default);
        paused.resumed_by = Some(user.to_string());
        paused.resume_time = Some(Utc::now());
        if execution.status == ExecutionStatus::Paused {
            execution.status = ExecutionStatus::Running;
        }
        Ok(())
    }

    async fn update_status(&self, execution_id: &str, status: ExecutionStatus) -> PersistenceResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(execution_id)
            .ok_or_else(|| PersistenceError::execution_not_found(execution_id))?;

        execution.status = status;
        if status == ExecutionStatus::Running && execution.start_time.is_none() {
            execution.start_time = Some(Utc::now());
        }
        if status.is_complete() {
            execution.end_time = Some(Utc::now());
        }
        Ok(())
    }
}
