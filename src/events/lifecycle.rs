//! # Lifecycle Events
//!
//! Everything the orchestration core announces about executions and stages.
//! Each variant carries the ids a subscriber needs to look the subject up
//! again; the serialized form is tagged with the dotted event name.

use crate::constants::events;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    #[serde(rename = "execution.launched")]
    ExecutionLaunched {
        execution_id: String,
        pipeline_config_id: Option<String>,
        executing_instance: Option<String>,
    },
    #[serde(rename = "execution.queued")]
    ExecutionQueued {
        execution_id: String,
        pipeline_config_id: String,
    },
    #[serde(rename = "execution.promoted")]
    ExecutionPromoted {
        execution_id: String,
        pipeline_config_id: String,
    },
    #[serde(rename = "execution.superseded")]
    ExecutionSuperseded {
        execution_id: String,
        pipeline_config_id: String,
        superseded_by: String,
    },
    #[serde(rename = "execution.resumed")]
    ExecutionResumed {
        execution_id: String,
        resumed_by: String,
    },
    #[serde(rename = "stage.planned")]
    StagePlanned {
        execution_id: String,
        stage_id: String,
        created_stages: Vec<String>,
        created_task_count: usize,
    },
    #[serde(rename = "stage.restarted")]
    StageRestarted {
        execution_id: String,
        stage_id: String,
        restarted_by: String,
        reset_stages: Vec<String>,
    },
}

impl LifecycleEvent {
    /// Dotted event name, e.g. `execution.queued`
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecutionLaunched { .. } => events::EXECUTION_LAUNCHED,
            Self::ExecutionQueued { .. } => events::EXECUTION_QUEUED,
            Self::ExecutionPromoted { .. } => events::EXECUTION_PROMOTED,
            Self::ExecutionSuperseded { .. } => events::EXECUTION_SUPERSEDED,
            Self::ExecutionResumed { .. } => events::EXECUTION_RESUMED,
            Self::StagePlanned { .. } => events::STAGE_PLANNED,
            Self::StageRestarted { .. } => events::STAGE_RESTARTED,
        }
    }

    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutionLaunched { execution_id, .. }
            | Self::ExecutionQueued { execution_id, .. }
            | Self::ExecutionPromoted { execution_id, .. }
            | Self::ExecutionSuperseded { execution_id, .. }
            | Self::ExecutionResumed { execution_id, .. }
            | Self::StagePlanned { execution_id, .. }
            | Self::StageRestarted { execution_id, .. } => execution_id,
        }
    }

    /// Subject stage, for stage events
    pub fn stage_id(&self) -> Option<&str> {
        match self {
            Self::StagePlanned { stage_id, .. } | Self::StageRestarted { stage_id, .. } => Some(stage_id),
            _ => None,
        }
    }

    /// Admission-controlled pipeline the event concerns, if any
    pub fn pipeline_config_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionLaunched { pipeline_config_id, .. } => pipeline_config_id.as_deref(),
            Self::ExecutionQueued { pipeline_config_id, .. }
            | Self::ExecutionPromoted { pipeline_config_id, .. }
            | Self::ExecutionSuperseded { pipeline_config_id, .. } => Some(pipeline_config_id),
            _ => None,
        }
    }
}
