//! Stage builders and execution fixtures shared by the integration tests

use serde_json::{json, Value};
use stagehand_core::models::{Execution, ExecutionType, Stage, StageContext};
use stagehand_core::orchestration::{
    BranchingStageDefinitionBuilder, GraphType, StageDefinitionBuilder, StageDefinitionRegistry, StageSeed,
    TaskGraph,
};
use std::sync::Arc;

pub struct WaitStage;

impl StageDefinitionBuilder for WaitStage {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full().with_task("wait", "waitTask")
    }
}

/// Two tasks with a validation stage before and a notification stage after
pub struct BakeStage;

impl StageDefinitionBuilder for BakeStage {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full()
            .with_task("createBake", "createBakeTask")
            .with_task("monitorBake", "monitorBakeTask")
    }

    fn around_stages(&self, _stage: &Stage) -> Vec<StageSeed> {
        vec![
            StageSeed::before("wait", "validate base image", StageContext::new()),
            StageSeed::after("wait", "notify", StageContext::new()),
        ]
    }
}

/// Fans out one branch per entry of `context.regions`
pub struct DeployStage;

impl StageDefinitionBuilder for DeployStage {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full()
            .with_task("createServerGroup", "createServerGroupTask")
            .with_task("waitForUpInstances", "waitForUpInstancesTask")
    }

    fn prepare_stage_for_restart(&self, stage: &mut Stage) {
        stage.context.remove("deploy.server.groups");
    }

    fn as_branching(&self) -> Option<&dyn BranchingStageDefinitionBuilder> {
        Some(self)
    }
}

impl BranchingStageDefinitionBuilder for DeployStage {
    fn parallel_contexts(&self, stage: &Stage) -> Vec<StageContext> {
        stage
            .context
            .get("regions")
            .and_then(Value::as_array)
            .map(|regions| {
                regions
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|region| {
                        let mut context = StageContext::new();
                        context.insert("name".to_string(), json!(format!("Deploy in {region}")));
                        context.insert("region".to_string(), json!(region));
                        context
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn build_pre_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::new(GraphType::Head).with_task("determineTargets", "determineTargetsTask")
    }

    fn parallel_stage_name(&self, stage: &Stage, has_multiple_branches: bool) -> String {
        if has_multiple_branches {
            "Parallel Deploy".to_string()
        } else {
            stage.name.clone()
        }
    }
}

/// Fans out one branch per entry of `context.clusters`. Branches report the
/// unregistered type `createServerGroup`, and a report stage runs after the
/// umbrella.
pub struct CanaryStage;

impl StageDefinitionBuilder for CanaryStage {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full()
            .with_task("deployCanary", "deployCanaryTask")
            .with_task("waitForHealthy", "waitForHealthyTask")
    }

    fn around_stages(&self, _stage: &Stage) -> Vec<StageSeed> {
        vec![StageSeed::after("wait", "report canary", StageContext::new())]
    }

    fn prepare_stage_for_restart(&self, stage: &mut Stage) {
        stage.context.remove("canary.scores");
    }

    fn as_branching(&self) -> Option<&dyn BranchingStageDefinitionBuilder> {
        Some(self)
    }
}

impl BranchingStageDefinitionBuilder for CanaryStage {
    fn parallel_contexts(&self, stage: &Stage) -> Vec<StageContext> {
        stage
            .context
            .get("clusters")
            .and_then(Value::as_array)
            .map(|clusters| {
                clusters
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|cluster| {
                        let mut context = StageContext::new();
                        context.insert("name".to_string(), json!(format!("Deploy {cluster}")));
                        context.insert("cluster".to_string(), json!(cluster));
                        context
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn child_stage_type(&self, _child: &Stage) -> String {
        "createServerGroup".to_string()
    }
}

/// `setup`, a polling loop, then `finish`
pub struct PollStage;

impl StageDefinitionBuilder for PollStage {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full()
            .with_task("setup", "setupTask")
            .with_graph(
                TaskGraph::new(GraphType::Loop)
                    .with_task("poll", "pollTask")
                    .with_task("check", "checkTask"),
            )
            .with_task("finish", "finishTask")
    }
}

/// Declares a HEAD graph where only FULL is allowed
pub struct BrokenStage;

impl StageDefinitionBuilder for BrokenStage {
    fn build_task_graph(&self, _stage: &Stage) -> TaskGraph {
        TaskGraph::full().with_graph(TaskGraph::new(GraphType::Head).with_task("oops", "oopsTask"))
    }
}

pub fn registry() -> Arc<StageDefinitionRegistry> {
    Arc::new(StageDefinitionRegistry::with_builders(vec![
        Arc::new(WaitStage),
        Arc::new(BakeStage),
        Arc::new(DeployStage),
        Arc::new(CanaryStage),
        Arc::new(PollStage),
        Arc::new(BrokenStage),
    ]))
}

pub fn stage(id: &str, ref_id: &str, stage_type: &str, requisites: &[&str]) -> Stage {
    Stage::new(id, stage_type, id, StageContext::new())
        .with_ref_id(ref_id)
        .with_requisite_stage_ref_ids(requisites.iter().copied())
}

pub fn deploy_stage(id: &str, ref_id: &str, regions: &[&str]) -> Stage {
    let mut stage = stage(id, ref_id, "deploy", &[]);
    stage.name = "Deploy".to_string();
    stage.context.insert("regions".to_string(), json!(regions));
    stage
}

pub fn canary_stage(id: &str, ref_id: &str, clusters: &[&str]) -> Stage {
    let mut stage = stage(id, ref_id, "canary", &[]);
    stage.context.insert("clusters".to_string(), json!(clusters));
    stage
}

pub fn pipeline(id: &str, stages: Vec<Stage>) -> Execution {
    let mut execution = Execution::new(id, ExecutionType::Pipeline, "orders");
    execution.stages = stages;
    execution
}

/// Raw launch request for a limited-concurrency pipeline of one wait stage
/// Like [`limited_pipeline_request`], with a stage of the given type
pub fn limited_request_with_stage(pipeline_config_id: &str, keep_waiting: bool, stage_type: &str) -> String {
    json!({
        "application": "orders",
        "name": "deploy",
        "pipelineConfigId": pipeline_config_id,
        "limitConcurrent": true,
        "keepWaitingPipelines": keep_waiting,
        "stages": [{"refId": "1", "type": stage_type}]
    })
    .to_string()
}

pub fn limited_pipeline_request(pipeline_config_id: &str, keep_waiting: bool) -> String {
    json!({
        "application": "orders",
        "name": "deploy",
        "pipelineConfigId": pipeline_config_id,
        "limitConcurrent": true,
        "keepWaitingPipelines": keep_waiting,
        "stages": [{"refId": "1", "type": "wait", "waitTime": 5}]
    })
    .to_string()
}
