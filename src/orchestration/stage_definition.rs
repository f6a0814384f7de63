//! # Stage Definition Builders
//!
//! The plugin boundary between the orchestration core and concrete stage
//! types. A builder turns a stage into a [`TaskGraph`] and may ask for
//! synthetic stages around it; a branching builder additionally fans one
//! umbrella stage out into parallel branch stages that share one plan.

use crate::constants::builtin;
use crate::models::{Stage, StageContext, SyntheticStageOwner};
use crate::orchestration::task_graph::{GraphType, TaskGraph};

/// Blueprint for a synthetic stage a builder wants placed around its stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageSeed {
    pub stage_type: String,
    pub name: String,
    pub context: StageContext,
    pub owner: SyntheticStageOwner,
}

impl StageSeed {
    pub fn before(stage_type: impl Into<String>, name: impl Into<String>, context: StageContext) -> Self {
        Self {
            stage_type: stage_type.into(),
            name: name.into(),
            context,
            owner: SyntheticStageOwner::Before,
        }
    }

    pub fn after(stage_type: impl Into<String>, name: impl Into<String>, context: StageContext) -> Self {
        Self {
            stage_type: stage_type.into(),
            name: name.into(),
            context,
            owner: SyntheticStageOwner::After,
        }
    }
}

pub trait StageDefinitionBuilder: Send + Sync {
    /// Stage type key this builder handles.
    ///
    /// Defaults to the implementing type's name with a `StageDefinitionBuilder`
    /// or `Stage` suffix removed and the first letter lowercased, so
    /// `WaitStage` handles `"wait"`.
    fn stage_type(&self) -> String {
        derive_stage_type(std::any::type_name_of_val(self))
    }

    /// Ordered tasks of a simple stage (a FULL graph)
    fn build_task_graph(&self, stage: &Stage) -> TaskGraph;

    /// Synthetic stages to inject before or after `stage`, in declared order
    fn around_stages(&self, _stage: &Stage) -> Vec<StageSeed> {
        Vec::new()
    }

    /// Clean up stage-type specific context before the stage re-runs
    fn prepare_stage_for_restart(&self, _stage: &mut Stage) {}

    /// Branching builders return themselves here
    fn as_branching(&self) -> Option<&dyn BranchingStageDefinitionBuilder> {
        None
    }
}

pub trait BranchingStageDefinitionBuilder: StageDefinitionBuilder {
    /// One context per parallel branch
    fn parallel_contexts(&self, stage: &Stage) -> Vec<StageContext>;

    fn build_pre_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::new(GraphType::Head)
    }

    fn build_post_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::new(GraphType::Tail)
    }

    /// Name for the umbrella stage once its branch count is known
    fn parallel_stage_name(&self, stage: &Stage, _has_multiple_branches: bool) -> String {
        stage.name.clone()
    }

    /// Effective type reported by a generated branch stage
    fn child_stage_type(&self, child: &Stage) -> String {
        child.stage_type.clone()
    }
}

/// `my_crate::stages::DeployStageDefinitionBuilder` -> `deploy`
pub fn derive_stage_type(type_name: &str) -> String {
    let short = type_name
        .split('<')
        .next()
        .unwrap_or(type_name)
        .rsplit("::")
        .next()
        .unwrap_or(type_name);
    let trimmed = short
        .strip_suffix("StageDefinitionBuilder")
        .or_else(|| short.strip_suffix("Stage"))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(short);

    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Stage injected ahead of any stage that asks to run only inside its
/// execution window; its single task suspends until the window opens
#[derive(Debug, Default)]
pub struct RestrictExecutionDuringTimeWindow;

impl StageDefinitionBuilder for RestrictExecutionDuringTimeWindow {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full().with_task(
            builtin::EXECUTION_WINDOW_TASK,
            builtin::EXECUTION_WINDOW_TASK,
        )
    }
}
