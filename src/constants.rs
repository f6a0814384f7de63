//! # System Constants
//!
//! Well-known stage context keys, built-in stage and task type keys, and the
//! names of lifecycle events published by the orchestration core.

/// Stage context keys read or written by the planner and restart engine
pub mod context_keys {
    /// Overrides the stage type used to resolve a builder
    pub const ALIAS: &str = "alias";
    /// Requests a synthetic execution-window stage ahead of the stage
    pub const RESTRICT_EXECUTION_DURING_TIME_WINDOW: &str = "restrictExecutionDuringTimeWindow";
    /// Deprecated free-form dependency list, superseded by `requisiteStageRefIds`
    pub const LEGACY_REQUISITE_IDS: &str = "requisiteIds";
    pub const RESTART_DETAILS: &str = "restartDetails";
    pub const RESTARTED_BY: &str = "restartedBy";
    pub const RESTART_TIME: &str = "restartTime";
    pub const PREVIOUS_EXCEPTION: &str = "previousException";
    pub const EXCEPTION: &str = "exception";
    /// Cloud provider of an ad-hoc orchestration stage
    pub const PROVIDER_TYPE: &str = "providerType";
    pub const CLOUD_PROVIDER: &str = "cloudProvider";
}

/// Stage and task types the core itself knows about
pub mod builtin {
    /// Synthetic stage injected ahead of window-restricted stages
    pub const EXECUTION_WINDOW_STAGE_TYPE: &str = "restrictExecutionDuringTimeWindow";
    pub const EXECUTION_WINDOW_TASK: &str = "suspendExecutionDuringTimeWindow";
    /// Entry marker of a branching stage with no pre-graph
    pub const BEGIN_PARALLEL_TASK: &str = "beginParallel";
    /// Exit marker of a branching stage with no post-graph
    pub const COMPLETE_PARALLEL_TASK: &str = "completeParallel";
    /// Work unit executed by the no-op boundary tasks
    pub const NO_OP_WORK_UNIT: &str = "noop";
}

/// Lifecycle events published on the orchestration event bus
pub mod events {
    pub const EXECUTION_LAUNCHED: &str = "execution.launched";
    pub const EXECUTION_QUEUED: &str = "execution.queued";
    pub const EXECUTION_PROMOTED: &str = "execution.promoted";
    pub const EXECUTION_SUPERSEDED: &str = "execution.superseded";
    pub const EXECUTION_RESUMED: &str = "execution.resumed";
    pub const STAGE_PLANNED: &str = "stage.planned";
    pub const STAGE_RESTARTED: &str = "stage.restarted";
}

/// Identity recorded when the system itself, rather than a user, acts
pub const ANONYMOUS_USER: &str = "anonymous";
