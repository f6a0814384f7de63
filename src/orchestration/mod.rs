//! # Orchestration Core
//!
//! Turns declarative stage lists into executable plans and controls when
//! executions run.
//!
//! ## Components
//!
//! - **StagePlanner**: expands a stage into its tasks, synthetic before/after
//!   stages and parallel branches, with deterministic ids
//! - **StageDefinitionRegistry**: stage type to builder lookup, with alias fallback
//! - **StageRestarter**: resets a halted stage and what its re-run invalidates
//! - **StartTracker** / **ExecutionCompletionListener**: single-flight admission
//!   per pipeline definition
//! - **ExecutionLauncher**: parse, persist, admit, plan and hand off
//!
//! Executing tasks is out of scope; the launcher hands planned executions to
//! an [`ExecutionRunner`].

pub mod completion_listener;
pub mod errors;
pub mod execution_lock;
pub mod launcher;
pub mod registry;
pub mod restart;
pub mod stage_definition;
pub mod stage_planner;
pub mod start_tracker;
pub mod task_graph;

pub use completion_listener::{CompletionReport, ExecutionCompletionListener};
pub use errors::{OrchestrationError, OrchestrationResult};
pub use execution_lock::ExecutionLocks;
pub use launcher::{ExecutionLauncher, ExecutionRunner};
pub use registry::StageDefinitionRegistry;
pub use restart::StageRestarter;
pub use stage_definition::{
    derive_stage_type, BranchingStageDefinitionBuilder, RestrictExecutionDuringTimeWindow,
    StageDefinitionBuilder, StageSeed,
};
pub use stage_planner::{PlanningOutcome, StagePlanner, StagePlanningService, TaskIdGenerators};
pub use start_tracker::{InMemoryStartTracker, StartTracker, StartedExecution};
pub use task_graph::{GraphType, PlannedTask, TaskDefinition, TaskGraph, TaskNode};
