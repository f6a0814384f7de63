//! # Stage Lifecycle Planner
//!
//! Expands a stage into the concrete stages and tasks that will run:
//! synthetic BEFORE/AFTER stages, parallel branch stages for branching
//! builders, and the flattened task list.
//!
//! ## Idempotence
//!
//! Planning the same stage twice must not create anything new. Two rules make
//! that hold across process restarts:
//!
//! - Synthetic stage ids are derived from the parent id, the parent's counter
//!   and the child name. The counter is rewound to a fixed base before every
//!   planning phase (BEFORE seeds from 0, branches after the BEFORE seeds,
//!   AFTER seeds after the branches), so the same phase always replays the
//!   same counter values.
//! - Task ids come from [`TaskIdGenerators`], which count per stage from 1.
//!   An existing task with the generated id is reused instead of duplicated.
//!
//! Callers must hold the execution's lock (see
//! [`ExecutionLocks`](crate::orchestration::execution_lock::ExecutionLocks))
//! while planning, because insertion indexes are computed from the live list.

use crate::constants::{builtin, context_keys};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::logging::log_stage_operation;
use crate::models::{Execution, Stage, SyntheticStageOwner, Task};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::execution_lock::ExecutionLocks;
use crate::orchestration::registry::StageDefinitionRegistry;
use crate::orchestration::stage_definition::{BranchingStageDefinitionBuilder, StageDefinitionBuilder};
use crate::orchestration::task_graph::{GraphType, TaskGraph};
use crate::persistence::ExecutionRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Per-stage task id counters for one planning run
#[derive(Debug, Default)]
pub struct TaskIdGenerators {
    counters: HashMap<String, u32>,
}

impl TaskIdGenerators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for `stage_id`: "1", "2", ...
    pub fn next_id(&mut self, stage_id: &str) -> String {
        let counter = self.counters.entry(stage_id.to_string()).or_insert(0);
        *counter += 1;
        counter.to_string()
    }
}

/// What a planning call added to the execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanningOutcome {
    pub created_stages: Vec<String>,
    /// `(stage_id, task_id)` pairs
    pub created_tasks: Vec<(String, String)>,
}

impl PlanningOutcome {
    pub fn is_noop(&self) -> bool {
        self.created_stages.is_empty() && self.created_tasks.is_empty()
    }

    fn merge(&mut self, other: PlanningOutcome) {
        self.created_stages.extend(other.created_stages);
        self.created_tasks.extend(other.created_tasks);
    }
}

/// Counter values each planning phase starts from
#[derive(Debug, Clone, Copy)]
struct CounterLayout {
    branch_base: u32,
    after_base: u32,
}

#[derive(Debug, Clone)]
pub struct StagePlanner {
    registry: Arc<StageDefinitionRegistry>,
}

impl StagePlanner {
    pub fn new(registry: Arc<StageDefinitionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<StageDefinitionRegistry> {
        &self.registry
    }

    /// Plan `stage_id`, its synthetic stages and their synthetic stages, in
    /// BEFORE, self, AFTER order
    pub fn plan_stage_tree(
        &self,
        execution: &mut Execution,
        stage_id: &str,
        ids: &mut TaskIdGenerators,
    ) -> OrchestrationResult<PlanningOutcome> {
        let mut outcome = PlanningOutcome::default();

        let before = self.plan_around_stages(execution, stage_id, SyntheticStageOwner::Before, &mut outcome)?;
        for synthetic_id in before {
            outcome.merge(self.plan_stage_tree(execution, &synthetic_id, ids)?);
        }

        outcome.merge(self.plan_stage(execution, stage_id, ids)?);

        let after = self.plan_around_stages(execution, stage_id, SyntheticStageOwner::After, &mut outcome)?;
        for synthetic_id in after {
            outcome.merge(self.plan_stage_tree(execution, &synthetic_id, ids)?);
        }

        Ok(outcome)
    }

    /// Materialize the tasks of one stage, fanning out into branch stages
    /// when its builder is a branching builder
    pub fn plan_stage(
        &self,
        execution: &mut Execution,
        stage_id: &str,
        ids: &mut TaskIdGenerators,
    ) -> OrchestrationResult<PlanningOutcome> {
        let mut outcome = PlanningOutcome::default();
        let stage = Self::stage(execution, stage_id)?;

        if let Some(umbrella) = self.branching_umbrella(execution, stage) {
            let graph = self.shared_branch_graph(umbrella, stage)?;
            let stage = Self::stage_mut(execution, stage_id)?;
            plan_tasks(stage, &graph, ids, &mut outcome)?;
        } else {
            let builder = self.registry.resolve(stage)?;
            if let Some(branching) = builder.as_branching() {
                self.plan_branches(execution, stage_id, builder.as_ref(), branching, ids, &mut outcome)?;
            } else {
                let graph = builder.build_task_graph(stage);
                let stage = Self::stage_mut(execution, stage_id)?;
                plan_tasks(stage, &graph, ids, &mut outcome)?;
            }
        }

        debug!(
            execution_id = %execution.id,
            stage_id = %stage_id,
            created_stages = outcome.created_stages.len(),
            created_tasks = outcome.created_tasks.len(),
            "Planned stage"
        );
        Ok(outcome)
    }

    /// Insert the synthetic stages `owner` asks for around `stage_id`.
    ///
    /// Returns the ids of every synthetic stage on that side, existing or new,
    /// in declared order so the caller can plan them in that order.
    pub fn plan_around_stages(
        &self,
        execution: &mut Execution,
        stage_id: &str,
        owner: SyntheticStageOwner,
        outcome: &mut PlanningOutcome,
    ) -> OrchestrationResult<Vec<String>> {
        let stage = Self::stage(execution, stage_id)?;
        if self.branching_umbrella(execution, stage).is_some() {
            return Ok(Vec::new());
        }
        let builder = self.registry.resolve(stage)?;
        let layout = Self::counter_layout(stage, builder.as_ref());
        let window = owner == SyntheticStageOwner::Before && Self::needs_execution_window(stage);
        let seeds: Vec<_> = builder
            .around_stages(stage)
            .into_iter()
            .filter(|seed| seed.owner == owner)
            .collect();

        let parent = Self::stage_mut(execution, stage_id)?;
        parent.stage_counter = match owner {
            SyntheticStageOwner::Before => 0,
            SyntheticStageOwner::After => layout.after_base,
        };

        let mut synthetic = Vec::with_capacity(seeds.len() + 1);
        if window {
            let context = parent.context.clone();
            synthetic.push(Stage::new_synthetic(
                parent,
                builtin::EXECUTION_WINDOW_STAGE_TYPE,
                builtin::EXECUTION_WINDOW_STAGE_TYPE,
                context,
                SyntheticStageOwner::Before,
            ));
        }
        for seed in seeds {
            synthetic.push(Stage::new_synthetic(
                parent,
                seed.stage_type,
                seed.name,
                seed.context,
                owner,
            ));
        }

        let declared: Vec<String> = synthetic.iter().map(|stage| stage.id.clone()).collect();
        match owner {
            // Each insert lands at the parent's current index, pushing the
            // parent right, so forward iteration keeps declared order
            SyntheticStageOwner::Before => {
                for stage in synthetic {
                    Self::insert_synthetic(execution, stage_id, stage, outcome)?;
                }
            }
            // Each insert lands right after the parent, so reverse iteration
            // keeps declared order
            SyntheticStageOwner::After => {
                for stage in synthetic.into_iter().rev() {
                    Self::insert_synthetic(execution, stage_id, stage, outcome)?;
                }
            }
        }

        Ok(declared)
    }

    fn plan_branches(
        &self,
        execution: &mut Execution,
        stage_id: &str,
        builder: &dyn StageDefinitionBuilder,
        branching: &dyn BranchingStageDefinitionBuilder,
        ids: &mut TaskIdGenerators,
        outcome: &mut PlanningOutcome,
    ) -> OrchestrationResult<()> {
        let umbrella = Self::stage(execution, stage_id)?;
        let layout = Self::counter_layout(umbrella, builder);

        let mut pre_graph = branching.build_pre_graph(umbrella);
        if pre_graph.is_empty() {
            pre_graph = TaskGraph::new(GraphType::Head)
                .with_task(builtin::BEGIN_PARALLEL_TASK, builtin::NO_OP_WORK_UNIT);
        }
        let mut post_graph = branching.build_post_graph(umbrella);
        if post_graph.is_empty() {
            post_graph = TaskGraph::new(GraphType::Tail)
                .with_task(builtin::COMPLETE_PARALLEL_TASK, builtin::NO_OP_WORK_UNIT);
        }
        pre_graph.flatten(stage_id)?;
        post_graph.flatten(stage_id)?;

        // An umbrella fans out once; re-planning reuses the recorded branches
        // even if its context now yields different parallel contexts
        let (branches, parallel_name) = if umbrella.parallel_branch_count.is_some() {
            let branches: Vec<Stage> = execution
                .parallel_branches(stage_id)
                .into_iter()
                .cloned()
                .collect();
            (branches, None)
        } else {
            let contexts = branching.parallel_contexts(umbrella);
            let parallel_name = branching.parallel_stage_name(umbrella, contexts.len() > 1);

            let umbrella = Self::stage_mut(execution, stage_id)?;
            umbrella.stage_counter = layout.branch_base;
            let branch_type = umbrella.stage_type.clone();
            let mut branches = Vec::with_capacity(contexts.len());
            for context in contexts {
                // Fall back to the type, not the name: the umbrella gets renamed
                // below and ids must not change between planning runs
                let name = context
                    .get("name")
                    .and_then(|value| value.as_str())
                    .map_or_else(|| branch_type.clone(), str::to_string);
                let mut branch = Stage::new_synthetic(
                    umbrella,
                    branch_type.clone(),
                    name,
                    context,
                    SyntheticStageOwner::After,
                );
                branch.parallel_branch = true;
                branches.push(branch);
            }
            (branches, Some(parallel_name))
        };

        let shared_graph = match branches.first() {
            Some(first) => Some(self.shared_branch_graph(Self::stage(execution, stage_id)?, first)?),
            None => {
                warn!(
                    execution_id = %execution.id,
                    stage_id = %stage_id,
                    "Branching stage produced no parallel contexts"
                );
                None
            }
        };

        // Structure validated, start mutating
        let umbrella = Self::stage_mut(execution, stage_id)?;
        if let Some(parallel_name) = parallel_name {
            umbrella.name = parallel_name;
            umbrella.parallel_branch_count = Some(branches.len() as u32);
        }
        umbrella.initialization_stage = true;
        plan_tasks(umbrella, &pre_graph, ids, outcome)?;

        let mut cursor = Self::stage_index(execution, stage_id)? + 1;
        for mut branch in branches {
            let branch_id = branch.id.clone();
            match execution.stage_index(&branch_id) {
                Some(existing) => cursor = cursor.max(existing + 1),
                None => {
                    // The shared graph is built from the branch as the
                    // umbrella's type; the effective type applies afterwards
                    branch.stage_type = branching.child_stage_type(&branch);
                    execution.stages.insert(cursor, branch);
                    outcome.created_stages.push(branch_id.clone());
                    cursor += 1;
                }
            }

            if let Some(graph) = &shared_graph {
                let branch_stage = Self::stage_mut(execution, &branch_id)?;
                plan_tasks(branch_stage, graph, ids, outcome)?;
            }
        }

        let umbrella = Self::stage_mut(execution, stage_id)?;
        plan_tasks(umbrella, &post_graph, ids, outcome)?;
        Ok(())
    }

    /// The graph every branch of `umbrella` runs. Resolved under the
    /// umbrella's type, honouring an alias carried by the branch context.
    fn shared_branch_graph(&self, umbrella: &Stage, branch: &Stage) -> OrchestrationResult<TaskGraph> {
        let alias = branch
            .context
            .get(context_keys::ALIAS)
            .and_then(|value| value.as_str());
        let builder = match self.registry.resolve_type(&umbrella.stage_type, alias) {
            Ok(builder) => builder,
            Err(_) => self.registry.resolve(umbrella)?,
        };
        let graph = builder.build_task_graph(branch);
        graph.flatten(&branch.id)?;
        Ok(graph)
    }

    fn insert_synthetic(
        execution: &mut Execution,
        parent_id: &str,
        stage: Stage,
        outcome: &mut PlanningOutcome,
    ) -> OrchestrationResult<()> {
        if execution.contains_stage(&stage.id) {
            return Ok(());
        }

        let parent_index =
            execution
                .stage_index(parent_id)
                .ok_or_else(|| OrchestrationError::MissingParentStage {
                    stage_id: stage.id.clone(),
                    parent_stage_id: parent_id.to_string(),
                })?;
        let index = match stage.synthetic_stage_owner {
            Some(SyntheticStageOwner::After) => parent_index + 1,
            _ => parent_index,
        };

        outcome.created_stages.push(stage.id.clone());
        execution.stages.insert(index, stage);
        Ok(())
    }

    fn counter_layout(stage: &Stage, builder: &dyn StageDefinitionBuilder) -> CounterLayout {
        let window = u32::from(Self::needs_execution_window(stage));
        let before = builder
            .around_stages(stage)
            .iter()
            .filter(|seed| seed.owner == SyntheticStageOwner::Before)
            .count() as u32;
        let branches = match stage.parallel_branch_count {
            Some(count) => count,
            None => builder
                .as_branching()
                .map_or(0, |branching| branching.parallel_contexts(stage).len() as u32),
        };

        CounterLayout {
            branch_base: window + before,
            after_base: window + before + branches,
        }
    }

    /// The umbrella `stage` was fanned out from, when it is a parallel branch
    /// of a stage whose builder still branches. Branches are planned from
    /// the umbrella's builder, whatever effective type they report.
    fn branching_umbrella<'a>(&self, execution: &'a Execution, stage: &Stage) -> Option<&'a Stage> {
        execution.branch_umbrella(stage).filter(|umbrella| {
            self.registry
                .find(umbrella)
                .is_some_and(|builder| builder.as_branching().is_some())
        })
    }

    fn needs_execution_window(stage: &Stage) -> bool {
        !stage.is_synthetic() && stage.context_flag(context_keys::RESTRICT_EXECUTION_DURING_TIME_WINDOW)
    }

    fn stage<'a>(execution: &'a Execution, stage_id: &str) -> OrchestrationResult<&'a Stage> {
        execution
            .stage_by_id(stage_id)
            .ok_or_else(|| OrchestrationError::stage_not_found(&execution.id, stage_id))
    }

    fn stage_mut<'a>(execution: &'a mut Execution, stage_id: &str) -> OrchestrationResult<&'a mut Stage> {
        let execution_id = execution.id.clone();
        execution
            .stage_by_id_mut(stage_id)
            .ok_or_else(|| OrchestrationError::stage_not_found(execution_id, stage_id))
    }

    fn stage_index(execution: &Execution, stage_id: &str) -> OrchestrationResult<usize> {
        execution
            .stage_index(stage_id)
            .ok_or_else(|| OrchestrationError::stage_not_found(&execution.id, stage_id))
    }
}

/// Flatten `graph` onto `stage`, reusing tasks whose generated id already exists
fn plan_tasks(
    stage: &mut Stage,
    graph: &TaskGraph,
    ids: &mut TaskIdGenerators,
    outcome: &mut PlanningOutcome,
) -> OrchestrationResult<()> {
    let planned = graph.flatten(&stage.id)?;

    for entry in planned {
        let task_id = ids.next_id(&stage.id);
        let index = match stage.tasks.iter().position(|task| task.id == task_id) {
            Some(index) => index,
            None => {
                stage.tasks.push(Task::new(
                    task_id.clone(),
                    entry.definition.name.clone(),
                    entry.definition.work_unit_ref.clone(),
                ));
                outcome.created_tasks.push((stage.id.clone(), task_id));
                stage.tasks.len() - 1
            }
        };

        let task = &mut stage.tasks[index];
        task.stage_start |= entry.stage_start;
        task.stage_end |= entry.stage_end;
        task.loop_start |= entry.loop_start;
        task.loop_end |= entry.loop_end;
    }

    Ok(())
}

/// Plans stages of stored executions under the execution lock and persists
/// the result
pub struct StagePlanningService {
    planner: Arc<StagePlanner>,
    repository: Arc<dyn ExecutionRepository>,
    locks: Arc<ExecutionLocks>,
    event_publisher: EventPublisher,
}

impl StagePlanningService {
    pub fn new(
        planner: Arc<StagePlanner>,
        repository: Arc<dyn ExecutionRepository>,
        locks: Arc<ExecutionLocks>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            planner,
            repository,
            locks,
            event_publisher,
        }
    }

    /// Plan a stage the executor has reached. Already-planned stages are a no-op.
    #[instrument(skip(self))]
    pub async fn plan_stage(&self, execution_id: &str, stage_id: &str) -> OrchestrationResult<PlanningOutcome> {
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.repository.retrieve(execution_id).await?;

        let mut ids = TaskIdGenerators::new();
        let outcome = self.planner.plan_stage_tree(&mut execution, stage_id, &mut ids)?;
        if outcome.is_noop() {
            debug!(execution_id = %execution_id, stage_id = %stage_id, "Stage already planned");
            return Ok(outcome);
        }

        self.repository.store(&execution).await?;

        info!(
            execution_id = %execution_id,
            stage_id = %stage_id,
            created_stages = outcome.created_stages.len(),
            created_tasks = outcome.created_tasks.len(),
            "Stage planned"
        );
        log_stage_operation(
            "plan",
            execution_id,
            stage_id,
            execution.stage_by_id(stage_id).map(|stage| stage.stage_type.as_str()),
            "PLANNED",
            None,
        );

        self.event_publisher.publish(LifecycleEvent::StagePlanned {
            execution_id: execution_id.to_string(),
            stage_id: stage_id.to_string(),
            created_stages: outcome.created_stages.clone(),
            created_task_count: outcome.created_tasks.len(),
        });

        Ok(outcome)
    }
}
