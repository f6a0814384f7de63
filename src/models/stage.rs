//! # Stage Model
//!
//! A declared or synthetic unit of work within an execution.
//!
//! Stages never hold references to each other. Relationships are expressed
//! through ids: `ref_id`/`requisite_stage_ref_ids` for the DAG and
//! `parent_stage_id` for synthetic ownership, which keeps an execution's stage
//! list a flat, serializable arena.

use super::status::ExecutionStatus;
use super::task::Task;
use crate::constants::context_keys;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::warn;

/// Stage parameters; doubles as scratch space for tasks
pub type StageContext = Map<String, Value>;

/// Position of a synthetic stage relative to the stage that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyntheticStageOwner {
    #[serde(rename = "STAGE_BEFORE")]
    Before,
    #[serde(rename = "STAGE_AFTER")]
    After,
}

impl SyntheticStageOwner {
    fn ref_id_separator(&self) -> char {
        match self {
            Self::Before => '<',
            Self::After => '>',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub requisite_stage_ref_ids: BTreeSet<String>,
    #[serde(rename = "type")]
    pub stage_type: String,
    pub name: String,
    #[serde(default)]
    pub context: StageContext,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_stage_id: Option<String>,
    #[serde(default)]
    pub synthetic_stage_owner: Option<SyntheticStageOwner>,
    #[serde(default)]
    pub initialization_stage: bool,
    /// Number of branch stages an umbrella fanned out into. Fixed at the
    /// first fan-out; later context changes do not re-fan the umbrella.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_branch_count: Option<u32>,
    /// Set on the stages a branching stage fans out into
    #[serde(default)]
    pub parallel_branch: bool,
    /// Source of the counter embedded in synthetic child ids. Transient: the
    /// planner rewinds it before every planning phase.
    #[serde(skip)]
    pub stage_counter: u32,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Stage {
    /// Create a top-level (non-synthetic) stage
    pub fn new(
        id: impl Into<String>,
        stage_type: impl Into<String>,
        name: impl Into<String>,
        context: StageContext,
    ) -> Self {
        Self {
            id: id.into(),
            ref_id: None,
            requisite_stage_ref_ids: BTreeSet::new(),
            stage_type: stage_type.into(),
            name: name.into(),
            context,
            status: ExecutionStatus::NotStarted,
            start_time: None,
            end_time: None,
            parent_stage_id: None,
            synthetic_stage_owner: None,
            initialization_stage: false,
            parallel_branch_count: None,
            parallel_branch: false,
            stage_counter: 0,
            tasks: Vec::new(),
        }
    }

    /// Create a synthetic child of `parent`, consuming one tick of the
    /// parent's counter.
    ///
    /// The id is a pure function of the parent id, the counter value and the
    /// name, so replanning the same parent yields the same child ids.
    pub fn new_synthetic(
        parent: &mut Stage,
        stage_type: impl Into<String>,
        name: impl Into<String>,
        context: StageContext,
        owner: SyntheticStageOwner,
    ) -> Self {
        let name = name.into();
        let counter = parent.next_synthetic_counter();
        let ref_id = parent
            .ref_id
            .as_ref()
            .map(|parent_ref| format!("{parent_ref}{}{counter}", owner.ref_id_separator()));

        let mut stage = Stage::new(
            synthetic_stage_id(&parent.id, counter, &name),
            stage_type,
            name,
            context,
        );
        stage.ref_id = ref_id;
        stage.parent_stage_id = Some(parent.id.clone());
        stage.synthetic_stage_owner = Some(owner);
        stage
    }

    pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn with_requisite_stage_ref_ids<I, S>(mut self, ref_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requisite_stage_ref_ids = ref_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic_stage_owner.is_some()
    }

    pub fn next_synthetic_counter(&mut self) -> u32 {
        self.stage_counter += 1;
        self.stage_counter
    }

    pub fn task_by_id(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    /// Read a boolean flag from the context, accepting `true` or `"true"`
    pub fn context_flag(&self, key: &str) -> bool {
        match self.context.get(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Ref ids this stage waits on.
    ///
    /// `requisite_stage_ref_ids` is canonical. The legacy `requisiteIds`
    /// context key is only read when the canonical set is empty.
    pub fn requisite_ref_ids(&self) -> BTreeSet<String> {
        if !self.requisite_stage_ref_ids.is_empty() {
            return self.requisite_stage_ref_ids.clone();
        }

        match self.context.get(context_keys::LEGACY_REQUISITE_IDS) {
            Some(Value::Array(values)) => {
                warn!(
                    stage_id = %self.id,
                    "Stage uses deprecated requisiteIds context key for dependencies"
                );
                values
                    .iter()
                    .filter_map(|value| value.as_str().map(str::to_string))
                    .collect()
            }
            _ => BTreeSet::new(),
        }
    }

    pub fn depends_on(&self, ref_id: &str) -> bool {
        self.requisite_ref_ids().contains(ref_id)
    }

    /// Put the stage and every task back to NOT_STARTED
    pub fn reset(&mut self) {
        self.status = ExecutionStatus::NotStarted;
        self.start_time = None;
        self.end_time = None;
        for task in &mut self.tasks {
            task.reset();
        }
    }

    /// Reset the tasks of the loop body (loop start through loop end) so the
    /// loop runs again. Returns how many tasks were reset.
    pub fn reset_loop_body(&mut self) -> usize {
        let start = self.tasks.iter().position(|task| task.loop_start);
        let end = self.tasks.iter().position(|task| task.loop_end);

        match (start, end) {
            (Some(start), Some(end)) if start <= end => {
                for task in &mut self.tasks[start..=end] {
                    task.status = ExecutionStatus::NotStarted;
                    task.end_time = None;
                }
                end - start + 1
            }
            _ => 0,
        }
    }
}

/// Deterministic id of a synthetic stage: `parentId-counter-sanitizedName`
pub fn synthetic_stage_id(parent_id: &str, counter: u32, name: &str) -> String {
    format!("{parent_id}-{counter}-{}", sanitize_stage_name(name))
}

/// Strip everything but ASCII letters and digits
pub fn sanitize_stage_name(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect()
}
