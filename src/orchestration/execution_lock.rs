//! Per-execution mutual exclusion.
//!
//! Stage-list splicing computes insertion indexes from the current list, so
//! two planners working on the same execution must not interleave. Different
//! executions never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
pub struct ExecutionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `execution_id`; released on drop
    pub async fn lock(&self, execution_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!(execution_id = %execution_id, "Acquiring execution lock");
        mutex.lock_owned().await
    }

    /// Drop lock entries nobody holds or waits on
    pub fn prune_idle(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
