//! # Start Tracker
//!
//! Shared admission-control state: for each pipeline definition, the set of
//! executions currently running and the queue of executions waiting to run.
//!
//! Implementations must make [`StartTracker::queue_if_not_started`] and
//! [`StartTracker::remove_from_queue`] atomic against the shared store. A
//! read-then-write would let two executions both see an empty started set.
//! Stores that detect contention instead of serializing it return
//! [`OrchestrationError::AdmissionRaceDetected`](crate::orchestration::errors::OrchestrationError::AdmissionRaceDetected)
//! and the caller retries the whole decision.
//!
//! Queues are strictly FIFO by a monotonic enqueue sequence.
//!
//! ```rust
//! use stagehand_core::orchestration::{InMemoryStartTracker, StartTracker};
//!
//! tokio_test::block_on(async {
//!     let tracker = InMemoryStartTracker::new();
//!     assert!(!tracker.queue_if_not_started("cfg-1", "e1").await.unwrap());
//!     assert!(tracker.queue_if_not_started("cfg-1", "e2").await.unwrap());
//!     assert_eq!(tracker.queued_executions("cfg-1").await.unwrap(), vec!["e2"]);
//!
//!     tracker.mark_as_finished("cfg-1", "e1").await.unwrap();
//!     assert!(tracker.promote("cfg-1", "e2").await.unwrap());
//! });
//! ```

use crate::orchestration::errors::OrchestrationResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A running execution and the pipeline definition it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StartedExecution {
    pub pipeline_config_id: String,
    pub execution_id: String,
}

#[async_trait]
pub trait StartTracker: Send + Sync {
    /// Atomically: if another execution of `pipeline_config_id` is started,
    /// append `execution_id` to the queue and return `true`. Otherwise mark
    /// `execution_id` as started (reserving the slot) and return `false`.
    async fn queue_if_not_started(
        &self,
        pipeline_config_id: &str,
        execution_id: &str,
    ) -> OrchestrationResult<bool>;

    /// Record that `execution_id` is running. Idempotent.
    async fn add_to_started(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<()>;

    async fn mark_as_finished(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<()>;

    /// Every started execution across all pipeline definitions
    async fn all_started(&self) -> OrchestrationResult<Vec<StartedExecution>>;

    async fn started_executions(&self, pipeline_config_id: &str) -> OrchestrationResult<Vec<String>>;

    /// Queued execution ids, oldest first
    async fn queued_executions(&self, pipeline_config_id: &str) -> OrchestrationResult<Vec<String>>;

    /// Atomically remove `execution_id` from the queue. Returns `false` if it
    /// was not queued, e.g. because another worker already took it.
    async fn remove_from_queue(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool>;

    /// Atomically move `execution_id` from the queue into the started set.
    /// Returns `false` and changes nothing when it is no longer queued or
    /// another execution of the pipeline is already started.
    async fn promote(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedEntry {
    sequence: u64,
    execution_id: String,
}

#[derive(Debug, Default)]
struct PipelineAdmission {
    started: BTreeSet<String>,
    queue: Vec<QueuedEntry>,
}

impl PipelineAdmission {
    fn is_idle(&self) -> bool {
        self.started.is_empty() && self.queue.is_empty()
    }
}

/// Process-local tracker; each pipeline's state sits behind one map shard
/// lock, which makes check-and-append atomic
#[derive(Debug, Default)]
pub struct InMemoryStartTracker {
    pipelines: DashMap<String, PipelineAdmission>,
    sequence: AtomicU64,
}

impl InMemoryStartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl StartTracker for InMemoryStartTracker {
    async fn queue_if_not_started(
        &self,
        pipeline_config_id: &str,
        execution_id: &str,
    ) -> OrchestrationResult<bool> {
        let mut admission = self.pipelines.entry(pipeline_config_id.to_string()).or_default();

        let others_started = admission.started.iter().any(|started| started != execution_id);
        if !others_started {
            admission.started.insert(execution_id.to_string());
            debug!(
                pipeline_config_id = %pipeline_config_id,
                execution_id = %execution_id,
                "No execution running, reserved start slot"
            );
            return Ok(false);
        }

        if !admission.queue.iter().any(|entry| entry.execution_id == execution_id) {
            let sequence = self.next_sequence();
            admission.queue.push(QueuedEntry {
                sequence,
                execution_id: execution_id.to_string(),
            });
        }
        debug!(
            pipeline_config_id = %pipeline_config_id,
            execution_id = %execution_id,
            queue_length = admission.queue.len(),
            "Execution queued behind running execution"
        );
        Ok(true)
    }

    async fn add_to_started(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<()> {
        self.pipelines
            .entry(pipeline_config_id.to_string())
            .or_default()
            .started
            .insert(execution_id.to_string());
        Ok(())
    }

    async fn mark_as_finished(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<()> {
        if let Some(mut admission) = self.pipelines.get_mut(pipeline_config_id) {
            admission.started.remove(execution_id);
        }
        self.pipelines
            .remove_if(pipeline_config_id, |_, admission| admission.is_idle());
        Ok(())
    }

    async fn all_started(&self) -> OrchestrationResult<Vec<StartedExecution>> {
        let mut started: Vec<StartedExecution> = self
            .pipelines
            .iter()
            .flat_map(|entry| {
                let pipeline_config_id = entry.key().clone();
                entry
                    .value()
                    .started
                    .iter()
                    .map(|execution_id| StartedExecution {
                        pipeline_config_id: pipeline_config_id.clone(),
                        execution_id: execution_id.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        started.sort();
        Ok(started)
    }

    async fn started_executions(&self, pipeline_config_id: &str) -> OrchestrationResult<Vec<String>> {
        Ok(self
            .pipelines
            .get(pipeline_config_id)
            .map(|admission| admission.started.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn queued_executions(&self, pipeline_config_id: &str) -> OrchestrationResult<Vec<String>> {
        Ok(self
            .pipelines
            .get(pipeline_config_id)
            .map(|admission| {
                let mut queue = admission.queue.clone();
                queue.sort_by_key(|entry| entry.sequence);
                queue.into_iter().map(|entry| entry.execution_id).collect()
            })
            .unwrap_or_default())
    }

    async fn remove_from_queue(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool> {
        let removed = match self.pipelines.get_mut(pipeline_config_id) {
            Some(mut admission) => {
                let before = admission.queue.len();
                admission.queue.retain(|entry| entry.execution_id != execution_id);
                admission.queue.len() != before
            }
            None => false,
        };
        self.pipelines
            .remove_if(pipeline_config_id, |_, admission| admission.is_idle());
        Ok(removed)
    }

    async fn promote(&self, pipeline_config_id: &str, execution_id: &str) -> OrchestrationResult<bool> {
        let Some(mut admission) = self.pipelines.get_mut(pipeline_config_id) else {
            return Ok(false);
        };
        if admission.started.iter().any(|started| started != execution_id) {
            return Ok(false);
        }
        let Some(position) = admission
            .queue
            .iter()
            .position(|entry| entry.execution_id == execution_id)
        else {
            return Ok(false);
        };

        admission.queue.remove(position);
        admission.started.insert(execution_id.to_string());
        debug!(
            pipeline_config_id = %pipeline_config_id,
            execution_id = %execution_id,
            queue_length = admission.queue.len(),
            "Promoted queued execution to started"
        );
        Ok(true)
    }
}
