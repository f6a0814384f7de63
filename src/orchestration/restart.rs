//! # Restart/Resume Engine
//!
//! Makes a halted stage runnable again. Complete stages downstream of it,
//! and every synthetic stage owned by anything being restarted, are reset in
//! full; the restarted stage itself only has its halted tasks reset, so work
//! that already succeeded is not repeated.
//!
//! Every reset is persisted as it happens. A persistence failure aborts the
//! restart and is returned unchanged; stages already written stay written,
//! and a retried restart converges because planning is idempotent.

use crate::constants::context_keys;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::logging::log_stage_operation;
use crate::models::{Execution, ExecutionStatus, InvocationContext, PausedDetails, Stage};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::execution_lock::ExecutionLocks;
use crate::orchestration::registry::StageDefinitionRegistry;
use crate::orchestration::stage_definition::StageDefinitionBuilder;
use crate::persistence::ExecutionRepository;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct StageRestarter {
    registry: Arc<StageDefinitionRegistry>,
    repository: Arc<dyn ExecutionRepository>,
    locks: Arc<ExecutionLocks>,
    event_publisher: EventPublisher,
}

impl StageRestarter {
    pub fn new(
        registry: Arc<StageDefinitionRegistry>,
        repository: Arc<dyn ExecutionRepository>,
        locks: Arc<ExecutionLocks>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            registry,
            repository,
            locks,
            event_publisher,
        }
    }

    /// Load, restart and return the execution, holding its lock throughout
    #[instrument(skip(self, ctx), fields(user = %ctx.user_or_anonymous()))]
    pub async fn restart(
        &self,
        execution_id: &str,
        stage_id: &str,
        ctx: &InvocationContext,
    ) -> OrchestrationResult<Execution> {
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.repository.retrieve(execution_id).await?;
        self.prepare_stage_for_restart(&mut execution, stage_id, ctx).await?;
        Ok(execution)
    }

    /// Reset `stage_id` and everything its re-run invalidates, persisting
    /// each stage, and resume the execution if it is paused.
    ///
    /// Returns the restarted stage as stored.
    pub async fn prepare_stage_for_restart(
        &self,
        execution: &mut Execution,
        stage_id: &str,
        ctx: &InvocationContext,
    ) -> OrchestrationResult<Stage> {
        if !execution.contains_stage(stage_id) {
            return Err(OrchestrationError::stage_not_found(&execution.id, stage_id));
        }
        let user = ctx.user_or_anonymous().to_string();

        let dependents = Self::collect_dependents(execution, stage_id);
        debug!(
            execution_id = %execution.id,
            stage_id = %stage_id,
            dependents = dependents.len(),
            "Resetting stages invalidated by restart"
        );
        for dependent_id in &dependents {
            self.reset_stage(execution, dependent_id).await?;
        }

        let stage = {
            let builder = self.builder_for(execution, stage_id);
            let stage = Self::stage_mut(execution, stage_id)?;
            if let Some(builder) = builder {
                builder.prepare_stage_for_restart(stage);
            }

            for task in stage.tasks.iter_mut().filter(|task| task.status.is_halt()) {
                task.reset();
            }
            record_restart_details(stage, &user);
            stage.status = ExecutionStatus::Running;
            stage.start_time = None;
            stage.end_time = None;
            stage.clone()
        };
        self.repository.store_stage(&execution.id, &stage).await?;

        if execution.is_paused() {
            self.repository.resume(&execution.id, &user, true).await?;
            let paused = execution.paused.get_or_insert_with(PausedDetails::default);
            paused.resumed_by = Some(user.clone());
            paused.resume_time = Some(Utc::now());
            info!(execution_id = %execution.id, resumed_by = %user, "Resumed paused execution for restart");
            self.event_publisher.publish(LifecycleEvent::ExecutionResumed {
                execution_id: execution.id.clone(),
                resumed_by: user.clone(),
            });
        }
        if execution.status == ExecutionStatus::Paused || execution.status.is_complete() {
            self.repository
                .update_status(&execution.id, ExecutionStatus::Running)
                .await?;
            execution.status = ExecutionStatus::Running;
            execution.end_time = None;
        }

        log_stage_operation(
            "restart",
            &execution.id,
            stage_id,
            Some(&stage.stage_type),
            &stage.status.to_string(),
            Some(&format!("{} dependent stages reset", dependents.len())),
        );
        self.event_publisher.publish(LifecycleEvent::StageRestarted {
            execution_id: execution.id.clone(),
            stage_id: stage_id.to_string(),
            restarted_by: user,
            reset_stages: dependents,
        });

        Ok(stage)
    }

    /// Stages to reset in full, breadth first: complete downstream stages of
    /// anything in the restart set, and synthetic children of anything in it
    fn collect_dependents(execution: &Execution, stage_id: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::from([stage_id.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::from([stage_id.to_string()]);
        let mut dependents = Vec::new();

        while let Some(current) = queue.pop_front() {
            let downstream = execution
                .downstream_stages(&current)
                .into_iter()
                .filter(|stage| stage.status.is_complete());
            let synthetic = execution.synthetic_children(&current).into_iter();

            for stage in downstream.chain(synthetic) {
                if visited.insert(stage.id.clone()) {
                    dependents.push(stage.id.clone());
                    queue.push_back(stage.id.clone());
                }
            }
        }

        dependents
    }

    async fn reset_stage(&self, execution: &mut Execution, stage_id: &str) -> OrchestrationResult<()> {
        let builder = self.builder_for(execution, stage_id);
        let stage = Self::stage_mut(execution, stage_id)?;
        if let Some(builder) = builder {
            builder.prepare_stage_for_restart(stage);
        }
        stage.reset();

        let snapshot = stage.clone();
        self.repository.store_stage(&execution.id, &snapshot).await?;
        Ok(())
    }

    /// Builder whose restart hook applies to `stage_id`. Parallel branches
    /// belong to their umbrella's builder.
    fn builder_for(&self, execution: &Execution, stage_id: &str) -> Option<Arc<dyn StageDefinitionBuilder>> {
        let stage = execution.stage_by_id(stage_id)?;
        execution
            .branch_umbrella(stage)
            .and_then(|umbrella| self.registry.find(umbrella))
            .or_else(|| self.registry.find(stage))
    }

    fn stage_mut<'a>(execution: &'a mut Execution, stage_id: &str) -> OrchestrationResult<&'a mut Stage> {
        let execution_id = execution.id.clone();
        execution
            .stage_by_id_mut(stage_id)
            .ok_or_else(|| OrchestrationError::stage_not_found(execution_id, stage_id))
    }
}

/// `restartDetails = {restartedBy, restartTime, previousException}`; the
/// stage's current `exception` moves into `previousException`
fn record_restart_details(stage: &mut Stage, user: &str) {
    let mut details = Map::new();
    details.insert(context_keys::RESTARTED_BY.to_string(), json!(user));
    details.insert(
        context_keys::RESTART_TIME.to_string(),
        json!(Utc::now().timestamp_millis()),
    );
    if let Some(exception) = stage.context.remove(context_keys::EXCEPTION) {
        details.insert(context_keys::PREVIOUS_EXCEPTION.to_string(), exception);
    }
    stage
        .context
        .insert(context_keys::RESTART_DETAILS.to_string(), Value::Object(details));
}
