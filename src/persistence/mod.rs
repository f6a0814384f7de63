//! # Execution Persistence
//!
//! The narrow storage contract the orchestration core consumes. Durable
//! implementations live outside this crate; [`InMemoryExecutionRepository`]
//! backs tests and single-process embedding.

pub mod in_memory;

use crate::models::{Execution, ExecutionStatus, Stage};
use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::InMemoryExecutionRepository;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistenceError {
    #[error("Execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    #[error("Stage {stage_id} not found in execution {execution_id}")]
    StageNotFound {
        execution_id: String,
        stage_id: String,
    },

    #[error("Execution {execution_id} is {status}, expected {expected}")]
    InvalidStatus {
        execution_id: String,
        status: ExecutionStatus,
        expected: ExecutionStatus,
    },

    #[error("Repository backend error: {0}")]
    Backend(String),
}

impl PersistenceError {
    pub fn execution_not_found(execution_id: impl Into<String>) -> Self {
        Self::ExecutionNotFound {
            execution_id: execution_id.into(),
        }
    }
}

pub type PersistenceResult<T> = anyhow::Result<T, PersistenceError>;

/// Storage for executions. Writes are last-writer-wins per stage.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Create or replace a whole execution
    async fn store(&self, execution: &Execution) -> PersistenceResult<()>;

    /// Replace a single stage of a stored execution, matched by stage id
    async fn store_stage(&self, execution_id: &str, stage: &Stage) -> PersistenceResult<()>;

    async fn retrieve(&self, execution_id: &str) -> PersistenceResult<Execution>;

    /// Flag the execution as canceled. An execution that never started goes
    /// straight to CANCELED; a running one is left for the executor to stop.
    async fn cancel(
        &self,
        execution_id: &str,
        user: Option<&str>,
        reason: Option<&str>,
    ) -> PersistenceResult<()>;

    /// Clear the paused state, recording who resumed. Unless
    /// `ignore_current_status` is set, only a PAUSED execution can be resumed.
    async fn resume(
        &self,
        execution_id: &str,
        user: &str,
        ignore_current_status: bool,
    ) -> PersistenceResult<()>;

    async fn update_status(&self, execution_id: &str, status: ExecutionStatus) -> PersistenceResult<()>;
}
