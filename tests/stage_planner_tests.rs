mod common;

use common::*;
use serde_json::json;
use stagehand_core::constants::builtin;
use stagehand_core::models::{ExecutionStatus, Stage, StageContext, SyntheticStageOwner};
use stagehand_core::orchestration::{OrchestrationError, StagePlanner, TaskIdGenerators};
use stagehand_core::persistence::ExecutionRepository;

fn planner() -> StagePlanner {
    StagePlanner::new(registry())
}

#[test]
fn test_branching_stage_fans_out_with_shared_plan() {
    let mut execution = pipeline("e1", vec![deploy_stage("s1", "1", &["us-east-1", "us-west-2"])]);

    planner()
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();

    let ids: Vec<&str> = execution.stages.iter().map(|stage| stage.id.as_str()).collect();
    assert_eq!(ids, vec!["s1", "s1-1-Deployinuseast1", "s1-2-Deployinuswest2"]);

    let umbrella = &execution.stages[0];
    assert_eq!(umbrella.name, "Parallel Deploy");
    assert!(umbrella.initialization_stage);
    let umbrella_tasks: Vec<(&str, bool, bool)> = umbrella
        .tasks
        .iter()
        .map(|task| (task.name.as_str(), task.stage_start, task.stage_end))
        .collect();
    assert_eq!(
        umbrella_tasks,
        vec![
            ("determineTargets", true, false),
            (builtin::COMPLETE_PARALLEL_TASK, false, true)
        ]
    );

    for (branch, region) in execution.stages[1..].iter().zip(["us-east-1", "us-west-2"]) {
        assert_eq!(branch.parent_stage_id.as_deref(), Some("s1"));
        assert_eq!(branch.synthetic_stage_owner, Some(SyntheticStageOwner::After));
        assert_eq!(branch.stage_type, "deploy");
        assert_eq!(branch.context["region"], region);
        let task_ids: Vec<&str> = branch.tasks.iter().map(|task| task.id.as_str()).collect();
        assert_eq!(task_ids, vec!["1", "2"]);
        assert!(branch.tasks[0].stage_start && !branch.tasks[0].stage_end);
        assert!(branch.tasks[1].stage_end && !branch.tasks[1].stage_start);
    }
    assert_eq!(execution.stages[1].ref_id.as_deref(), Some("1>1"));
    assert_eq!(execution.stages[2].ref_id.as_deref(), Some("1>2"));
}

#[test]
fn test_single_branch_keeps_stage_name() {
    let mut execution = pipeline("e1", vec![deploy_stage("s1", "1", &["eu-west-1"])]);
    planner()
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();

    assert_eq!(execution.stages[0].name, "Deploy");
    assert_eq!(execution.stages.len(), 2);
}

#[test]
fn test_replanning_branches_creates_nothing() {
    let planner = planner();
    let mut execution = pipeline("e1", vec![deploy_stage("s1", "1", &["us-east-1", "us-west-2"])]);
    planner
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();
    let planned = execution.clone();

    let outcome = planner
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();
    assert!(outcome.is_noop());

    // A branch reached later by the executor runs the shared graph only
    let branch_outcome = planner
        .plan_stage_tree(&mut execution, "s1-1-Deployinuseast1", &mut TaskIdGenerators::new())
        .unwrap();
    assert!(branch_outcome.is_noop());
    assert_eq!(execution, planned);
}

#[test]
fn test_branches_report_child_type_and_replan_cleanly() {
    let planner = planner();
    let mut execution = pipeline("e1", vec![canary_stage("s1", "1", &["baseline", "canary"])]);
    planner
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();

    let umbrella = execution.stage_by_id("s1").unwrap();
    assert_eq!(umbrella.parallel_branch_count, Some(2));
    let branches = execution.parallel_branches("s1");
    let branch_ids: Vec<&str> = branches.iter().map(|branch| branch.id.as_str()).collect();
    assert_eq!(branch_ids, vec!["s1-1-Deploybaseline", "s1-2-Deploycanary"]);
    for branch in &branches {
        assert_eq!(branch.stage_type, "createServerGroup");
        let names: Vec<&str> = branch.tasks.iter().map(|task| task.name.as_str()).collect();
        assert_eq!(names, vec!["deployCanary", "waitForHealthy"]);
    }

    let report = execution.stage_by_id("s1-3-reportcanary").unwrap();
    assert_eq!(report.stage_type, "wait");
    assert!(!report.parallel_branch);
    assert_eq!(report.tasks.len(), 1);

    let planned = execution.clone();
    for stage_id in ["s1", "s1-1-Deploybaseline", "s1-2-Deploycanary", "s1-3-reportcanary"] {
        let outcome = planner
            .plan_stage_tree(&mut execution, stage_id, &mut TaskIdGenerators::new())
            .unwrap();
        assert!(outcome.is_noop(), "replanning {stage_id} created {outcome:?}");
    }
    assert_eq!(execution, planned);
}

#[test]
fn test_fan_out_is_fixed_after_first_planning() {
    let planner = planner();
    let mut execution = pipeline("e1", vec![canary_stage("s1", "1", &["baseline", "canary"])]);
    planner
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();
    let planned_ids: Vec<String> = execution.stages.iter().map(|stage| stage.id.clone()).collect();

    // A task rewrote the umbrella's context between planning passes
    execution.stages[0]
        .context
        .insert("clusters".to_string(), json!(["baseline", "canary", "control"]));
    let outcome = planner
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();

    assert!(outcome.is_noop(), "replanning created {outcome:?}");
    let ids: Vec<String> = execution.stages.iter().map(|stage| stage.id.clone()).collect();
    assert_eq!(ids, planned_ids);
    assert!(execution.contains_stage("s1-3-reportcanary"));
}

#[tokio::test]
async fn test_planning_service_plans_branch_reached_by_executor() {
    let harness = Harness::new();
    harness
        .repository
        .store(&pipeline("e1", vec![canary_stage("s1", "1", &["baseline"])]))
        .await
        .unwrap();
    harness.planning.plan_stage("e1", "s1").await.unwrap();

    let outcome = harness
        .planning
        .plan_stage("e1", "s1-1-Deploybaseline")
        .await
        .unwrap();
    assert!(outcome.is_noop());
}

#[test]
fn test_execution_window_precedes_before_stages() {
    let mut bake = stage("s1", "1", "bake", &[]);
    bake.context
        .insert("restrictExecutionDuringTimeWindow".to_string(), json!(true));
    let mut execution = pipeline("e1", vec![bake]);

    planner()
        .plan_stage_tree(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();

    let ids: Vec<&str> = execution.stages.iter().map(|stage| stage.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "s1-1-restrictExecutionDuringTimeWindow",
            "s1-2-validatebaseimage",
            "s1",
            "s1-3-notify"
        ]
    );
    assert_eq!(execution.stages[0].ref_id.as_deref(), Some("1<1"));
    assert_eq!(execution.stages[3].ref_id.as_deref(), Some("1>3"));
    assert_eq!(execution.stages[0].tasks[0].name, builtin::EXECUTION_WINDOW_TASK);
    assert!(execution.stages.iter().all(|stage| !stage.tasks.is_empty()));
}

#[test]
fn test_loop_graph_flags_and_reset() {
    let mut execution = pipeline("e1", vec![stage("s1", "1", "poll", &[])]);
    planner()
        .plan_stage(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();

    let flags: Vec<(&str, bool, bool, bool, bool)> = execution.stages[0]
        .tasks
        .iter()
        .map(|task| {
            (
                task.id.as_str(),
                task.stage_start,
                task.stage_end,
                task.loop_start,
                task.loop_end,
            )
        })
        .collect();
    assert_eq!(
        flags,
        vec![
            ("1", true, false, false, false),
            ("2", false, false, true, false),
            ("3", false, false, false, true),
            ("4", false, true, false, false),
        ]
    );

    let poll = &mut execution.stages[0];
    for task in &mut poll.tasks[..3] {
        task.status = ExecutionStatus::Succeeded;
    }
    poll.tasks[2].status = ExecutionStatus::Redirect;
    assert_eq!(poll.reset_loop_body(), 2);
    assert_eq!(poll.tasks[0].status, ExecutionStatus::Succeeded);
    assert_eq!(poll.tasks[1].status, ExecutionStatus::NotStarted);
    assert_eq!(poll.tasks[2].status, ExecutionStatus::NotStarted);
}

#[test]
fn test_malformed_graph_is_rejected() {
    let mut execution = pipeline("e1", vec![stage("s1", "1", "broken", &[])]);
    let result = planner().plan_stage(&mut execution, "s1", &mut TaskIdGenerators::new());

    assert!(matches!(result, Err(OrchestrationError::MalformedTaskGraph { .. })));
    assert!(execution.stages[0].tasks.is_empty());
}

#[test]
fn test_alias_resolves_renamed_stage_types() {
    let mut context = StageContext::new();
    context.insert("alias".to_string(), json!("wait"));
    let mut execution = pipeline("e1", vec![Stage::new("s1", "pause", "Pause", context)]);

    planner()
        .plan_stage(&mut execution, "s1", &mut TaskIdGenerators::new())
        .unwrap();
    assert_eq!(execution.stages[0].tasks[0].name, "wait");
}

#[test]
fn test_every_planned_stage_has_one_start_and_one_end() {
    let mut execution = pipeline(
        "e1",
        vec![
            stage("s1", "1", "bake", &[]),
            deploy_stage("s2", "2", &["us-east-1", "us-west-2"]).with_requisite_stage_ref_ids(["1"]),
            stage("s3", "3", "poll", &["2"]),
        ],
    );

    let planner = planner();
    let mut ids = TaskIdGenerators::new();
    for stage_id in ["s1", "s2", "s3"] {
        planner.plan_stage_tree(&mut execution, stage_id, &mut ids).unwrap();
    }

    assert_eq!(execution.stages.len(), 7);
    for stage in &execution.stages {
        assert!(!stage.tasks.is_empty(), "stage {} has no tasks", stage.id);
        assert_eq!(stage.tasks.iter().filter(|task| task.stage_start).count(), 1);
        assert_eq!(stage.tasks.iter().filter(|task| task.stage_end).count(), 1);
    }
}

#[tokio::test]
async fn test_planning_service_persists_and_publishes() {
    let harness = Harness::new();
    let mut events = harness.publisher.subscribe();
    harness
        .repository
        .store(&pipeline("e1", vec![stage("s1", "1", "bake", &[])]))
        .await
        .unwrap();

    let outcome = harness.planning.plan_stage("e1", "s1").await.unwrap();
    assert_eq!(outcome.created_stages.len(), 2);

    let stored = harness.repository.retrieve("e1").await.unwrap();
    assert_eq!(stored.stages.len(), 3);
    assert!(stored.stages.iter().all(|stage| !stage.tasks.is_empty()));

    let event = events.recv().await.unwrap();
    assert_eq!(event.name(), "stage.planned");
    assert_eq!(event.event.stage_id(), Some("s1"));

    let again = harness.planning.plan_stage("e1", "s1").await.unwrap();
    assert!(again.is_noop());
    assert_eq!(harness.repository.retrieve("e1").await.unwrap(), stored);
}

#[tokio::test]
async fn test_concurrent_planning_of_one_stage_converges() {
    let harness = std::sync::Arc::new(Harness::new());
    harness
        .repository
        .store(&pipeline("e1", vec![deploy_stage("s1", "1", &["a", "b", "c"])]))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let harness = harness.clone();
            tokio::spawn(async move { harness.planning.plan_stage("e1", "s1").await.unwrap() })
        })
        .collect();
    let outcomes = futures::future::join_all(handles).await;

    let creators = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap())
        .filter(|outcome| !outcome.is_noop())
        .count();
    assert_eq!(creators, 1);
    assert_eq!(harness.repository.retrieve("e1").await.unwrap().stages.len(), 4);
}
