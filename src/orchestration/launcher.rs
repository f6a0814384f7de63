//! # Execution Launcher
//!
//! The single entry point for beginning a run: parse the request into an
//! [`Execution`], persist it, consult admission control, and either leave it
//! queued or plan its first stages and hand it to the [`ExecutionRunner`].
//!
//! ## Request shape
//!
//! ```json
//! {
//!   "application": "orders",
//!   "name": "deploy to prod",
//!   "pipelineConfigId": "b0c1...",
//!   "limitConcurrent": true,
//!   "keepWaitingPipelines": false,
//!   "executionEngine": "v3",
//!   "trigger": {"type": "manual"},
//!   "stages": [
//!     {"refId": "1", "type": "bake", "name": "Bake", "regions": ["us-east-1"]},
//!     {"refId": "2", "requisiteStageRefIds": ["1"], "type": "deploy"}
//!   ]
//! }
//! ```
//!
//! Stage fields other than `id`, `refId`, `requisiteStageRefIds`, `type` and
//! `name` become the stage context. Ad-hoc orchestrations may use
//! `description` instead of `name` and may omit refIds.

use crate::config::StagehandConfig;
use crate::constants::context_keys;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::logging::log_execution_operation;
use crate::models::{
    Execution, ExecutionEngine, ExecutionStatus, ExecutionType, InvocationContext, Stage, StageContext,
};
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::execution_lock::ExecutionLocks;
use crate::orchestration::stage_planner::{StagePlanner, TaskIdGenerators};
use crate::orchestration::start_tracker::StartTracker;
use crate::persistence::ExecutionRepository;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// The external executor that walks planned stages and advances task state
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    async fn start(&self, execution: &Execution) -> OrchestrationResult<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionRequest {
    #[serde(default)]
    execution_id: Option<String>,
    application: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    pipeline_config_id: Option<String>,
    #[serde(default)]
    limit_concurrent: bool,
    #[serde(default)]
    keep_waiting_pipelines: bool,
    #[serde(default)]
    execution_engine: Option<ExecutionEngine>,
    #[serde(default)]
    trigger: Value,
    #[serde(default)]
    stages: Vec<StageRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    ref_id: Option<String>,
    #[serde(default)]
    requisite_stage_ref_ids: BTreeSet<String>,
    #[serde(rename = "type")]
    stage_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    context: StageContext,
}

pub struct ExecutionLauncher {
    config: Arc<StagehandConfig>,
    planner: Arc<StagePlanner>,
    repository: Arc<dyn ExecutionRepository>,
    start_tracker: Arc<dyn StartTracker>,
    runner: Arc<dyn ExecutionRunner>,
    locks: Arc<ExecutionLocks>,
    event_publisher: EventPublisher,
}

impl ExecutionLauncher {
    pub fn new(
        config: Arc<StagehandConfig>,
        planner: Arc<StagePlanner>,
        repository: Arc<dyn ExecutionRepository>,
        start_tracker: Arc<dyn StartTracker>,
        runner: Arc<dyn ExecutionRunner>,
        locks: Arc<ExecutionLocks>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            config,
            planner,
            repository,
            start_tracker,
            runner,
            locks,
            event_publisher,
        }
    }

    /// Create and, unless admission control queues it, start an execution.
    ///
    /// A queued execution is returned NOT_STARTED; the completion listener
    /// launches it when its turn comes.
    #[instrument(skip(self, raw_request, ctx), fields(execution_type = %execution_type))]
    pub async fn start(
        &self,
        execution_type: ExecutionType,
        raw_request: &str,
        ctx: &InvocationContext,
    ) -> OrchestrationResult<Execution> {
        let execution = self.parse(execution_type, raw_request, ctx)?;
        self.repository.store(&execution).await?;
        log_execution_operation(
            "create",
            &execution.id,
            execution.pipeline_config_id.as_deref(),
            &execution.status.to_string(),
            None,
        );

        if let Some(pipeline_config_id) = self.admission_key(&execution) {
            if self.queue_if_not_started(pipeline_config_id, &execution.id).await? {
                info!(
                    execution_id = %execution.id,
                    pipeline_config_id = %pipeline_config_id,
                    "Execution queued behind a running execution of the same pipeline"
                );
                log_execution_operation(
                    "queue",
                    &execution.id,
                    Some(pipeline_config_id),
                    &execution.status.to_string(),
                    None,
                );
                self.event_publisher.publish(LifecycleEvent::ExecutionQueued {
                    execution_id: execution.id.clone(),
                    pipeline_config_id: pipeline_config_id.to_string(),
                });
                return Ok(execution);
            }
        }

        self.launch(&execution.id).await
    }

    /// Plan and start a stored execution. On failure the execution is marked
    /// TERMINAL and its admission slot released before the error is returned.
    #[instrument(skip(self))]
    pub async fn launch(&self, execution_id: &str) -> OrchestrationResult<Execution> {
        let result = self.plan_and_run(execution_id).await;
        if let Err(e) = &result {
            self.handle_launch_failure(execution_id, e).await;
        }
        result
    }

    /// Build an execution from a raw JSON request without persisting it
    pub fn parse(
        &self,
        execution_type: ExecutionType,
        raw_request: &str,
        ctx: &InvocationContext,
    ) -> OrchestrationResult<Execution> {
        let request: ExecutionRequest = serde_json::from_str(raw_request)?;
        if request.application.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "application must not be empty".to_string(),
            ));
        }
        if request.stages.is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "execution must declare at least one stage".to_string(),
            ));
        }

        let execution_id = request
            .execution_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut execution = Execution::new(execution_id, execution_type, request.application);
        execution.name = request.name.or(request.description);
        execution.execution_engine = request
            .execution_engine
            .unwrap_or(self.config.orchestration.default_execution_engine);
        execution.trigger = request.trigger;
        execution.authentication = ctx.authentication();
        execution.executing_instance = Some(self.config.orchestration.executing_instance.clone());
        execution.build_time = Some(Utc::now());

        if execution_type == ExecutionType::Pipeline {
            execution.pipeline_config_id = request.pipeline_config_id;
            execution.limit_concurrent = request.limit_concurrent;
            execution.keep_waiting_pipelines = request.keep_waiting_pipelines;
        }

        let mut previous_ref_id: Option<String> = None;
        for (index, stage_request) in request.stages.into_iter().enumerate() {
            let mut stage = self.build_stage(execution_type, stage_request, index, previous_ref_id.as_deref());
            if stage.id.is_empty() {
                stage.id = Uuid::new_v4().to_string();
            }
            previous_ref_id = stage.ref_id.clone();
            execution.stages.push(stage);
        }

        Self::validate_stage_graph(&execution)?;
        debug!(
            execution_id = %execution.id,
            stages = execution.stages.len(),
            engine = ?execution.execution_engine,
            "Parsed execution request"
        );
        Ok(execution)
    }

    fn build_stage(
        &self,
        execution_type: ExecutionType,
        request: StageRequest,
        index: usize,
        previous_ref_id: Option<&str>,
    ) -> Stage {
        let mut stage_type = request.stage_type;
        let name = request.name.unwrap_or_else(|| stage_type.clone());
        let mut ref_id = request.ref_id;
        let mut requisites = request.requisite_stage_ref_ids;

        if execution_type == ExecutionType::Orchestration {
            if ref_id.is_none() {
                ref_id = Some((index + 1).to_string());
                if requisites.is_empty() {
                    requisites.extend(previous_ref_id.map(str::to_string));
                }
            }

            let provider = [context_keys::PROVIDER_TYPE, context_keys::CLOUD_PROVIDER]
                .iter()
                .find_map(|key| request.context.get(*key).and_then(Value::as_str));
            if let Some(provider) = provider.filter(|p| self.config.is_non_default_provider(p)) {
                stage_type = format!("{stage_type}_{provider}");
            }
        }

        let mut stage = Stage::new(request.id.unwrap_or_default(), stage_type, name, request.context);
        stage.ref_id = ref_id;
        stage.requisite_stage_ref_ids = requisites;
        stage
    }

    fn validate_stage_graph(execution: &Execution) -> OrchestrationResult<()> {
        let mut ids = HashSet::new();
        for stage in &execution.stages {
            if !ids.insert(stage.id.as_str()) {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "duplicate stage id {}",
                    stage.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for ref_id in execution.stages.iter().filter_map(|stage| stage.ref_id.as_deref()) {
            if !seen.insert(ref_id) {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "duplicate stage refId {ref_id}"
                )));
            }
        }

        execution
            .topological_stages()
            .map(|_| ())
            .map_err(|e| OrchestrationError::InvalidStageGraph {
                execution_id: execution.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn queue_if_not_started(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool> {
        let max_attempts = self.config.admission.max_race_retries.max(1);
        let mut attempt = 1;
        loop {
            match self
                .start_tracker
                .queue_if_not_started(pipeline_config_id, execution_id)
                .await
            {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        pipeline_config_id = %pipeline_config_id,
                        execution_id = %execution_id,
                        attempt = attempt,
                        "Admission race detected, retrying"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn plan_and_run(&self, execution_id: &str) -> OrchestrationResult<Execution> {
        let _guard = self.locks.lock(execution_id).await;
        let mut execution = self.repository.retrieve(execution_id).await?;

        if execution.canceled {
            warn!(execution_id = %execution_id, "Execution was canceled before launch");
            self.release_admission_slot(&execution).await?;
            return Ok(execution);
        }

        let stage_ids: Vec<String> = match execution.execution_engine {
            ExecutionEngine::V3 => execution
                .initial_stages()
                .into_iter()
                .map(|stage| stage.id.clone())
                .collect(),
            ExecutionEngine::V2 => execution
                .topological_stages()
                .map_err(|e| OrchestrationError::InvalidStageGraph {
                    execution_id: execution.id.clone(),
                    reason: e.to_string(),
                })?
                .into_iter()
                .map(|stage| stage.id.clone())
                .collect(),
        };

        let mut ids = TaskIdGenerators::new();
        for stage_id in &stage_ids {
            self.planner.plan_stage_tree(&mut execution, stage_id, &mut ids)?;
        }

        execution.status = ExecutionStatus::Running;
        execution.start_time = Some(Utc::now());
        self.repository.store(&execution).await?;
        self.runner.start(&execution).await?;

        if let Some(pipeline_config_id) = self.admission_key(&execution) {
            self.start_tracker
                .add_to_started(pipeline_config_id, &execution.id)
                .await?;
        }

        info!(
            execution_id = %execution.id,
            planned_stages = stage_ids.len(),
            total_stages = execution.stages.len(),
            "Execution launched"
        );
        log_execution_operation(
            "launch",
            &execution.id,
            execution.pipeline_config_id.as_deref(),
            &execution.status.to_string(),
            None,
        );
        self.event_publisher.publish(LifecycleEvent::ExecutionLaunched {
            execution_id: execution.id.clone(),
            pipeline_config_id: execution.pipeline_config_id.clone(),
            executing_instance: execution.executing_instance.clone(),
        });

        Ok(execution)
    }

    async fn handle_launch_failure(&self, execution_id: &str, cause: &OrchestrationError) {
        error!(execution_id = %execution_id, error = %cause, "Failed to launch execution");

        if let Err(e) = self
            .repository
            .update_status(execution_id, ExecutionStatus::Terminal)
            .await
        {
            warn!(execution_id = %execution_id, error = %e, "Could not mark execution TERMINAL");
        }

        match self.repository.retrieve(execution_id).await {
            Ok(execution) => {
                if let Err(e) = self.release_admission_slot(&execution).await {
                    warn!(execution_id = %execution_id, error = %e, "Could not release admission slot");
                }
            }
            Err(e) => warn!(execution_id = %execution_id, error = %e, "Could not reload failed execution"),
        }
    }

    async fn release_admission_slot(&self, execution: &Execution) -> OrchestrationResult<()> {
        if let Some(pipeline_config_id) = self.admission_key(execution) {
            self.start_tracker
                .mark_as_finished(pipeline_config_id, &execution.id)
                .await?;
        }
        Ok(())
    }

    /// Pipeline config id to admit under, if admission control applies
    fn admission_key<'a>(&self, execution: &'a Execution) -> Option<&'a str> {
        execution
            .pipeline_config_id
            .as_deref()
            .filter(|_| self.config.admission.enabled && execution.is_admission_controlled())
    }
}
