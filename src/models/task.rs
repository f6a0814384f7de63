//! # Task Model
//!
//! The smallest schedulable unit. A task belongs to exactly one stage and
//! names the work unit the external executor should invoke.

use super::status::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within the owning stage
    pub id: String,
    pub name: String,
    /// Opaque reference to the logic the executor runs for this task
    pub work_unit_ref: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stage_start: bool,
    #[serde(default)]
    pub stage_end: bool,
    #[serde(default)]
    pub loop_start: bool,
    #[serde(default)]
    pub loop_end: bool,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, work_unit_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            work_unit_ref: work_unit_ref.into(),
            status: ExecutionStatus::NotStarted,
            start_time: None,
            end_time: None,
            stage_start: false,
            stage_end: false,
            loop_start: false,
            loop_end: false,
        }
    }

    /// Return the task to a runnable state, forgetting when it last ran
    pub fn reset(&mut self) {
        self.status = ExecutionStatus::NotStarted;
        self.start_time = None;
        self.end_time = None;
    }
}
