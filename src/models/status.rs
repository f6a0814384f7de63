use serde::{Deserialize, Serialize};
use std::fmt;

/// Status shared by executions, stages and tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Planned or queued but not yet picked up
    #[default]
    NotStarted,
    /// Currently being executed
    Running,
    /// Halted by an operator; resumable
    Paused,
    /// Waiting on an external signal (e.g. an execution window)
    Suspended,
    /// Completed successfully
    Succeeded,
    /// Failed, but the pipeline was configured to carry on
    FailedContinue,
    /// Failed and stopped the pipeline
    Terminal,
    /// Canceled by an operator or superseded by admission control
    Canceled,
    /// A loop-end task asked for the loop body to run again
    Redirect,
    /// Stopped without failing the pipeline
    Stopped,
    /// Never ran because a condition excluded it
    Skipped,
    /// Held back until capacity is available
    Buffered,
}

impl ExecutionStatus {
    /// Check if this status is final (no further transitions expected)
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::FailedContinue
                | Self::Terminal
                | Self::Canceled
                | Self::Stopped
                | Self::Skipped
        )
    }

    /// Check if this status is final but not a success, i.e. restartable
    pub fn is_halt(&self) -> bool {
        matches!(
            self,
            Self::Terminal | Self::Canceled | Self::Stopped | Self::FailedContinue
        )
    }

    /// Check if work in this status counts as done for downstream stages
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped | Self::FailedContinue)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Suspended => "SUSPENDED",
            Self::Succeeded => "SUCCEEDED",
            Self::FailedContinue => "FAILED_CONTINUE",
            Self::Terminal => "TERMINAL",
            Self::Canceled => "CANCELED",
            Self::Redirect => "REDIRECT",
            Self::Stopped => "STOPPED",
            Self::Skipped => "SKIPPED",
            Self::Buffered => "BUFFERED",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "SUSPENDED" => Ok(Self::Suspended),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED_CONTINUE" => Ok(Self::FailedContinue),
            "TERMINAL" => Ok(Self::Terminal),
            "CANCELED" => Ok(Self::Canceled),
            "REDIRECT" => Ok(Self::Redirect),
            "STOPPED" => Ok(Self::Stopped),
            "SKIPPED" => Ok(Self::Skipped),
            "BUFFERED" => Ok(Self::Buffered),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}
