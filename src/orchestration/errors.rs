//! # Orchestration Errors
//!
//! Failure taxonomy for planning, restart, admission control and launch.
//! Nothing here is swallowed inside the core: the caller that owns the
//! execution decides whether to mark it TERMINAL.

use crate::persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    /// No registered builder handles the stage's type (or its alias)
    #[error("No StageDefinitionBuilder implementation for {stage_type}")]
    NoBuilderForType { stage_type: String },

    /// A builder produced a task graph that cannot be flattened
    #[error("Malformed task graph for stage {stage_id}: {reason}")]
    MalformedTaskGraph { stage_id: String, reason: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The shared admission store reported contention; retry the decision
    #[error("Admission race detected for pipeline {pipeline_config_id} (execution {execution_id})")]
    AdmissionRaceDetected {
        pipeline_config_id: String,
        execution_id: String,
    },

    #[error("Stage {stage_id} not found in execution {execution_id}")]
    StageNotFound {
        execution_id: String,
        stage_id: String,
    },

    /// A synthetic stage names a parent that is not in the execution
    #[error("Parent stage {parent_stage_id} of {stage_id} does not exist")]
    MissingParentStage {
        stage_id: String,
        parent_stage_id: String,
    },

    #[error("Invalid stage graph in execution {execution_id}: {reason}")]
    InvalidStageGraph { execution_id: String, reason: String },

    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external executor refused or failed to start an execution
    #[error("Execution runner failed for {execution_id}: {reason}")]
    Runner { execution_id: String, reason: String },
}

impl OrchestrationError {
    pub fn no_builder(stage_type: impl Into<String>) -> Self {
        Self::NoBuilderForType {
            stage_type: stage_type.into(),
        }
    }

    pub fn malformed(stage_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTaskGraph {
            stage_id: stage_id.into(),
            reason: reason.into(),
        }
    }

    pub fn stage_not_found(execution_id: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self::StageNotFound {
            execution_id: execution_id.into(),
            stage_id: stage_id.into(),
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AdmissionRaceDetected { .. })
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidRequest(format!("JSON parse error: {error}"))
    }
}

pub type OrchestrationResult<T> = anyhow::Result<T, OrchestrationError>;
