//! # Execution Completion Listener
//!
//! Runs after any execution finishes. Releases the admission slot of every
//! started execution that has reached a terminal status, then promotes the
//! oldest queued execution of that pipeline. A queued execution that fails to
//! launch is marked TERMINAL and the next one is tried. The rest of the queue
//! is canceled as superseded unless it asked to keep waiting.
//!
//! Several workers may run the listener at once. Promotion moves an entry
//! from the queue into the started set in one atomic step, and only the
//! worker that moved it launches it.

use crate::events::{EventPublisher, LifecycleEvent};
use crate::logging::log_execution_operation;
use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestration::launcher::ExecutionLauncher;
use crate::orchestration::start_tracker::StartTracker;
use crate::persistence::{ExecutionRepository, PersistenceError};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What one listener pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub finished: Vec<String>,
    pub promoted: Vec<String>,
    pub superseded: Vec<String>,
    /// Queued executions whose launch failed; each was marked TERMINAL
    pub failed: Vec<String>,
}

impl CompletionReport {
    pub fn is_empty(&self) -> bool {
        self.finished.is_empty()
            && self.promoted.is_empty()
            && self.superseded.is_empty()
            && self.failed.is_empty()
    }
}

pub struct ExecutionCompletionListener {
    repository: Arc<dyn ExecutionRepository>,
    start_tracker: Arc<dyn StartTracker>,
    launcher: Arc<ExecutionLauncher>,
    event_publisher: EventPublisher,
}

impl ExecutionCompletionListener {
    pub fn new(
        repository: Arc<dyn ExecutionRepository>,
        start_tracker: Arc<dyn StartTracker>,
        launcher: Arc<ExecutionLauncher>,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            repository,
            start_tracker,
            launcher,
            event_publisher,
        }
    }

    #[instrument(skip(self))]
    pub async fn after_execution(&self) -> OrchestrationResult<CompletionReport> {
        let mut report = CompletionReport::default();

        let started_executions = self.start_tracker.all_started().await?;
        let lookups = join_all(
            started_executions
                .iter()
                .map(|started| self.repository.retrieve(&started.execution_id)),
        )
        .await;

        for (started, lookup) in started_executions.into_iter().zip(lookups) {
            let finished = match lookup {
                Ok(execution) => execution.status.is_complete(),
                Err(PersistenceError::ExecutionNotFound { .. }) => {
                    warn!(
                        execution_id = %started.execution_id,
                        pipeline_config_id = %started.pipeline_config_id,
                        "Started execution no longer exists, releasing its slot"
                    );
                    true
                }
                Err(e) => return Err(e.into()),
            };
            if !finished {
                continue;
            }

            self.start_tracker
                .mark_as_finished(&started.pipeline_config_id, &started.execution_id)
                .await?;
            debug!(
                execution_id = %started.execution_id,
                pipeline_config_id = %started.pipeline_config_id,
                "Released admission slot"
            );
            report.finished.push(started.execution_id.clone());

            self.process_queue(&started.pipeline_config_id, &mut report)
                .await?;
        }

        if !report.is_empty() {
            info!(
                finished = report.finished.len(),
                promoted = report.promoted.len(),
                superseded = report.superseded.len(),
                failed = report.failed.len(),
                "Completion listener pass"
            );
        }
        Ok(report)
    }

    async fn process_queue(&self, pipeline_config_id: &str, report: &mut CompletionReport) -> OrchestrationResult<()> {
        let queued = self.start_tracker.queued_executions(pipeline_config_id).await?;
        if queued.is_empty() {
            return Ok(());
        }

        let mut remaining = queued.into_iter();
        let mut promoted = None;
        for candidate in remaining.by_ref() {
            if !self.start_tracker.promote(pipeline_config_id, &candidate).await? {
                debug!(
                    pipeline_config_id = %pipeline_config_id,
                    execution_id = %candidate,
                    "Queue head taken by another worker or pipeline still running"
                );
                return Ok(());
            }

            // The launcher releases the slot of a canceled execution itself
            match self.launcher.launch(&candidate).await {
                Ok(execution) if execution.canceled => {
                    debug!(execution_id = %candidate, "Dropping canceled execution from queue");
                }
                Ok(_) => {
                    promoted = Some(candidate);
                    break;
                }
                Err(e) => {
                    warn!(
                        execution_id = %candidate,
                        pipeline_config_id = %pipeline_config_id,
                        error = %e,
                        "Queued execution failed to launch, trying the next one"
                    );
                    self.start_tracker
                        .mark_as_finished(pipeline_config_id, &candidate)
                        .await?;
                    report.failed.push(candidate);
                }
            }
        }

        let Some(promoted) = promoted else {
            return Ok(());
        };

        info!(
            execution_id = %promoted,
            pipeline_config_id = %pipeline_config_id,
            "Promoted queued execution"
        );
        self.event_publisher.publish(LifecycleEvent::ExecutionPromoted {
            execution_id: promoted.clone(),
            pipeline_config_id: pipeline_config_id.to_string(),
        });
        report.promoted.push(promoted.clone());

        for waiting in remaining {
            self.supersede(pipeline_config_id, &waiting, &promoted, report)
                .await?;
        }
        Ok(())
    }

    async fn supersede(
        &self,
        pipeline_config_id: &str,
        execution_id: &str,
        promoted: &str,
        report: &mut CompletionReport,
    ) -> OrchestrationResult<()> {
        let execution = self.repository.retrieve(execution_id).await?;
        if execution.keep_waiting_pipelines {
            return Ok(());
        }
        if !self
            .start_tracker
            .remove_from_queue(pipeline_config_id, execution_id)
            .await?
        {
            return Ok(());
        }

        let reason = format!("Superseded by execution {promoted}");
        self.repository
            .cancel(execution_id, None, Some(&reason))
            .await
            .map_err(OrchestrationError::from)?;

        log_execution_operation(
            "supersede",
            execution_id,
            Some(pipeline_config_id),
            "CANCELED",
            Some(&reason),
        );
        self.event_publisher.publish(LifecycleEvent::ExecutionSuperseded {
            execution_id: execution_id.to_string(),
            pipeline_config_id: pipeline_config_id.to_string(),
            superseded_by: promoted.to_string(),
        });
        report.superseded.push(execution_id.to_string());
        Ok(())
    }
}
