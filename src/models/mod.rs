//! # Data Model
//!
//! Executions, stages and tasks, plus the status vocabulary they share.
//! All types serialize with camelCase field names.

pub mod authentication;
pub mod execution;
pub mod stage;
pub mod status;
pub mod task;

pub use authentication::{Authentication, InvocationContext};
pub use execution::{Execution, ExecutionEngine, ExecutionType, InvalidStageGraph, PausedDetails};
pub use stage::{sanitize_stage_name, synthetic_stage_id, Stage, StageContext, SyntheticStageOwner};
pub use status::ExecutionStatus;
pub use task::Task;
