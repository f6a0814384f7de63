//! Crate-level error type.
//!
//! Component errors ([`OrchestrationError`], [`PersistenceError`],
//! [`ConfigurationError`]) convert into [`StagehandError`] so callers that do
//! not care which layer failed can use a single `?`.

use crate::config::ConfigurationError;
use crate::orchestration::errors::OrchestrationError;
use crate::persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = anyhow::Result<T, StagehandError>;
