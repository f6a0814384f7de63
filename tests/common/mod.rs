#![allow(dead_code)]

pub mod builders;
pub mod mocks;
pub mod strategies;

pub use builders::*;
pub use mocks::*;

use stagehand_core::config::StagehandConfig;
use stagehand_core::events::EventPublisher;
use stagehand_core::orchestration::{
    ExecutionCompletionListener, ExecutionLauncher, ExecutionLocks, ExecutionRunner, InMemoryStartTracker,
    StagePlanner, StagePlanningService, StageRestarter, StartTracker,
};
use stagehand_core::persistence::{ExecutionRepository, InMemoryExecutionRepository};
use std::sync::Arc;

/// Every orchestration component wired against in-memory collaborators
pub struct Harness {
    pub repository: Arc<InMemoryExecutionRepository>,
    pub start_tracker: Arc<dyn StartTracker>,
    pub runner: Arc<RecordingRunner>,
    pub publisher: EventPublisher,
    pub planner: Arc<StagePlanner>,
    pub launcher: Arc<ExecutionLauncher>,
    pub listener: ExecutionCompletionListener,
    pub restarter: StageRestarter,
    pub planning: StagePlanningService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(StagehandConfig::default(), Arc::new(InMemoryStartTracker::new()))
    }

    pub fn with(config: StagehandConfig, start_tracker: Arc<dyn StartTracker>) -> Self {
        let runner = Arc::new(RecordingRunner::new());
        Self::build(config, start_tracker, runner.clone(), runner)
    }

    pub fn with_runner(runner: Arc<dyn ExecutionRunner>) -> Self {
        Self::build(
            StagehandConfig::default(),
            Arc::new(InMemoryStartTracker::new()),
            Arc::new(RecordingRunner::new()),
            runner,
        )
    }

    fn build(
        config: StagehandConfig,
        start_tracker: Arc<dyn StartTracker>,
        recording: Arc<RecordingRunner>,
        runner: Arc<dyn ExecutionRunner>,
    ) -> Self {
        let registry = registry();
        let repository = Arc::new(InMemoryExecutionRepository::new());
        let locks = Arc::new(ExecutionLocks::new());
        let publisher = EventPublisher::new(64);
        let planner = Arc::new(StagePlanner::new(registry.clone()));
        let dyn_repository: Arc<dyn ExecutionRepository> = repository.clone();

        let launcher = Arc::new(ExecutionLauncher::new(
            Arc::new(config),
            planner.clone(),
            dyn_repository.clone(),
            start_tracker.clone(),
            runner,
            locks.clone(),
            publisher.clone(),
        ));
        let listener = ExecutionCompletionListener::new(
            dyn_repository.clone(),
            start_tracker.clone(),
            launcher.clone(),
            publisher.clone(),
        );
        let restarter = StageRestarter::new(registry, dyn_repository.clone(), locks.clone(), publisher.clone());
        let planning = StagePlanningService::new(planner.clone(), dyn_repository, locks, publisher.clone());

        Self {
            repository,
            start_tracker,
            runner: recording,
            publisher,
            planner,
            launcher,
            listener,
            restarter,
            planning,
        }
    }
}
