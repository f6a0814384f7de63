#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Stagehand Core
//!
//! Planning and admission core for a continuous-delivery pipeline engine.
//!
//! ## Overview
//!
//! A pipeline run is an [`Execution`](models::Execution): an ordered list of
//! [`Stage`](models::Stage)s wired into a DAG by `refId` dependencies. This
//! crate decides *what* runs and *when*; walking tasks and calling out to
//! cloud providers belongs to an external executor.
//!
//! - **Stage planning**: each stage type has a builder that yields a task
//!   graph and optional synthetic stages to run before or after it. Parallel
//!   stages fan out into one branch stage per context. Stage and task ids are
//!   deterministic, so planning the same stage twice changes nothing.
//! - **Restart/resume**: a halted stage can be re-run; downstream results it
//!   invalidates are reset and a paused execution is resumed.
//! - **Admission control**: at most one execution per pipeline definition
//!   runs when `limitConcurrent` is set; later ones queue and are promoted or
//!   superseded when the running one finishes.
//!
//! ## Module Organization
//!
//! - [`models`] - executions, stages, tasks and statuses
//! - [`orchestration`] - planner, registry, restart engine, admission control, launcher
//! - [`persistence`] - the storage contract and an in-memory implementation
//! - [`config`] - layered configuration
//! - [`events`] - lifecycle event broadcasting
//! - [`logging`] - tracing initialisation and structured log helpers
//! - [`error`] - crate-level error type
//!
//! ## Quick Start
//!
//! ```rust
//! use stagehand_core::models::{Execution, ExecutionType, Stage, StageContext};
//! use stagehand_core::orchestration::{
//!     StageDefinitionBuilder, StageDefinitionRegistry, StagePlanner, TaskGraph, TaskIdGenerators,
//! };
//! use std::sync::Arc;
//!
//! struct WaitStage;
//!
//! impl StageDefinitionBuilder for WaitStage {
//!     fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
//!         TaskGraph::full().with_task("wait", "waitTask")
//!     }
//! }
//!
//! let registry = StageDefinitionRegistry::new();
//! registry.register(Arc::new(WaitStage));
//! let planner = StagePlanner::new(Arc::new(registry));
//!
//! let mut execution = Execution::new("e1", ExecutionType::Pipeline, "orders");
//! execution
//!     .stages
//!     .push(Stage::new("s1", "wait", "Wait", StageContext::new()).with_ref_id("1"));
//!
//! let mut ids = TaskIdGenerators::new();
//! planner.plan_stage_tree(&mut execution, "s1", &mut ids).unwrap();
//! assert_eq!(execution.stages[0].tasks[0].id, "1");
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;

pub use config::{ConfigManager, StagehandConfig};
pub use error::{Result, StagehandError};
pub use events::{EventPublisher, LifecycleEvent};
pub use models::{Execution, ExecutionStatus, ExecutionType, InvocationContext, Stage, Task};
pub use orchestration::{
    ExecutionCompletionListener, ExecutionLauncher, ExecutionRunner, OrchestrationError, StagePlanner,
    StageRestarter,
};
pub use persistence::{ExecutionRepository, InMemoryExecutionRepository};
