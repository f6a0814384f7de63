//! # Execution Model
//!
//! One run of a pipeline definition or an ad-hoc orchestration. The execution
//! exclusively owns its ordered stage list; list order is significant for
//! synthetic stage placement, while the DAG itself lives in
//! `ref_id`/`requisite_stage_ref_ids`.

use super::authentication::Authentication;
use super::stage::{Stage, SyntheticStageOwner};
use super::status::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Pipeline,
    Orchestration,
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Orchestration => write!(f, "orchestration"),
        }
    }
}

/// Planning semantics an execution was launched under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEngine {
    /// Every top-level stage tree is planned up front at launch
    V2,
    /// Only initial stages are planned at launch; the rest as they are reached
    #[default]
    V3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedDetails {
    #[serde(default)]
    pub paused_by: Option<String>,
    #[serde(default)]
    pub pause_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed_by: Option<String>,
    #[serde(default)]
    pub resume_time: Option<DateTime<Utc>>,
}

impl PausedDetails {
    pub fn is_paused(&self) -> bool {
        self.pause_time.is_some() && self.resume_time.is_none()
    }
}

/// Raised when refId dependencies cannot be ordered
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid stage relationships found {relationships}")]
pub struct InvalidStageGraph {
    pub relationships: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    #[serde(rename = "type")]
    pub execution_type: ExecutionType,
    pub application: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub execution_engine: ExecutionEngine,
    #[serde(default)]
    pub pipeline_config_id: Option<String>,
    #[serde(default)]
    pub limit_concurrent: bool,
    #[serde(default)]
    pub keep_waiting_pipelines: bool,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub paused: Option<PausedDetails>,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub canceled_by: Option<String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub build_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub executing_instance: Option<String>,
    #[serde(default)]
    pub trigger: serde_json::Value,
    #[serde(default)]
    pub authentication: Authentication,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Execution {
    pub fn new(
        id: impl Into<String>,
        execution_type: ExecutionType,
        application: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            execution_type,
            application: application.into(),
            name: None,
            execution_engine: ExecutionEngine::default(),
            pipeline_config_id: None,
            limit_concurrent: false,
            keep_waiting_pipelines: false,
            status: ExecutionStatus::NotStarted,
            paused: None,
            canceled: false,
            canceled_by: None,
            cancellation_reason: None,
            build_time: None,
            start_time: None,
            end_time: None,
            executing_instance: None,
            trigger: serde_json::Value::Null,
            authentication: Authentication::default(),
            stages: Vec::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == ExecutionStatus::Paused
            || self.paused.as_ref().is_some_and(PausedDetails::is_paused)
    }

    /// Whether admission control applies to this execution
    pub fn is_admission_controlled(&self) -> bool {
        self.execution_type == ExecutionType::Pipeline
            && self.limit_concurrent
            && self.pipeline_config_id.is_some()
    }

    pub fn stage_index(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.id == stage_id)
    }

    pub fn contains_stage(&self, stage_id: &str) -> bool {
        self.stage_index(stage_id).is_some()
    }

    pub fn stage_by_id(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.id == stage_id)
    }

    pub fn stage_by_id_mut(&mut self, stage_id: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|stage| stage.id == stage_id)
    }

    pub fn stage_by_ref_id(&self, ref_id: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|stage| stage.ref_id.as_deref() == Some(ref_id))
    }

    /// Top-level stages with no dependencies
    pub fn initial_stages(&self) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|stage| stage.parent_stage_id.is_none() && stage.requisite_ref_ids().is_empty())
            .collect()
    }

    /// Stages whose parent is `stage_id`, in list order
    pub fn synthetic_children(&self, stage_id: &str) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|stage| stage.parent_stage_id.as_deref() == Some(stage_id))
            .collect()
    }

    /// Branch stages `umbrella_id` fanned out into, in list order
    pub fn parallel_branches(&self, umbrella_id: &str) -> Vec<&Stage> {
        self.stages
            .iter()
            .filter(|stage| stage.parallel_branch && stage.parent_stage_id.as_deref() == Some(umbrella_id))
            .collect()
    }

    /// The umbrella `stage` is a parallel branch of, if it is one.
    ///
    /// Branches are recognised by structure, not by type: a branch may
    /// report a different effective type than the umbrella that made it.
    pub fn branch_umbrella(&self, stage: &Stage) -> Option<&Stage> {
        if !stage.parallel_branch || stage.synthetic_stage_owner != Some(SyntheticStageOwner::After) {
            return None;
        }
        stage
            .parent_stage_id
            .as_deref()
            .and_then(|parent_id| self.stage_by_id(parent_id))
            .filter(|parent| parent.initialization_stage)
    }

    /// Stages that list `stage_id`'s refId among their requisites
    pub fn downstream_stages(&self, stage_id: &str) -> Vec<&Stage> {
        let Some(ref_id) = self.stage_by_id(stage_id).and_then(|s| s.ref_id.clone()) else {
            return Vec::new();
        };
        self.stages
            .iter()
            .filter(|stage| stage.id != stage_id && stage.depends_on(&ref_id))
            .collect()
    }

    /// Transitive closure of [`Execution::downstream_stages`], breadth first
    pub fn all_downstream_stages(&self, stage_id: &str) -> Vec<&Stage> {
        let mut found = Vec::new();
        let mut visited: HashSet<&str> = HashSet::from([stage_id]);
        let mut queue: VecDeque<&str> = VecDeque::from([stage_id]);

        while let Some(current) = queue.pop_front() {
            for child in self.downstream_stages(current) {
                if visited.insert(child.id.as_str()) {
                    queue.push_back(child.id.as_str());
                    found.push(child);
                }
            }
        }

        found
    }

    /// Walk `parent_stage_id` links up to the non-synthetic stage that owns
    /// `stage_id`. Parent chains are acyclic because a parent always exists
    /// before its synthetic children are created.
    pub fn root_stage(&self, stage_id: &str) -> Option<&Stage> {
        let mut current = self.stage_by_id(stage_id)?;
        while let Some(parent_id) = current.parent_stage_id.as_deref() {
            current = self.stage_by_id(parent_id)?;
        }
        Some(current)
    }

    /// Stages that must finish before `stage_id` can run: its requisite
    /// stages (and their synthetic children) transitively, or for a
    /// synthetic stage its parent chain.
    pub fn ancestors(&self, stage_id: &str) -> Vec<&Stage> {
        let mut visited = HashSet::new();
        let mut found = Vec::new();
        self.collect_ancestors(stage_id, &mut visited, &mut found);
        found
    }

    fn collect_ancestors<'a>(
        &'a self,
        stage_id: &str,
        visited: &mut HashSet<String>,
        found: &mut Vec<&'a Stage>,
    ) {
        let Some(stage) = self.stage_by_id(stage_id) else {
            return;
        };
        if !visited.insert(stage.id.clone()) {
            return;
        }

        let requisites = stage.requisite_ref_ids();
        if !requisites.is_empty() {
            let previous: Vec<&Stage> = self
                .stages
                .iter()
                .filter(|it| it.ref_id.as_ref().is_some_and(|r| requisites.contains(r)))
                .filter(|it| it.parent_stage_id.is_none())
                .collect();
            for prior in previous {
                if visited.contains(&prior.id) {
                    continue;
                }
                found.push(prior);
                for synthetic in self.synthetic_children(&prior.id) {
                    found.push(synthetic);
                }
                self.collect_ancestors(&prior.id, visited, found);
            }
        } else if let Some(parent_id) = stage.parent_stage_id.as_deref() {
            if let Some(parent) = self.stage_by_id(parent_id) {
                found.push(parent);
                self.collect_ancestors(parent_id, visited, found);
            }
        }
    }

    /// Order top-level stages so every stage follows its requisites
    pub fn topological_stages(&self) -> Result<Vec<&Stage>, InvalidStageGraph> {
        let mut unsorted: Vec<&Stage> = self
            .stages
            .iter()
            .filter(|stage| stage.parent_stage_id.is_none())
            .collect();
        let mut sorted = Vec::with_capacity(unsorted.len());
        let mut satisfied: HashSet<String> = HashSet::new();

        while !unsorted.is_empty() {
            let (ready, blocked): (Vec<&Stage>, Vec<&Stage>) = unsorted
                .into_iter()
                .partition(|stage| {
                    stage
                        .requisite_ref_ids()
                        .iter()
                        .all(|ref_id| satisfied.contains(ref_id))
                });

            if ready.is_empty() {
                let relationships = blocked
                    .iter()
                    .map(|stage| {
                        format!(
                            "{:?}->{}",
                            stage.requisite_ref_ids(),
                            stage.ref_id.as_deref().unwrap_or("?")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(InvalidStageGraph { relationships });
            }

            for stage in ready {
                if let Some(ref_id) = &stage.ref_id {
                    satisfied.insert(ref_id.clone());
                }
                sorted.push(stage);
            }
            unsorted = blocked;
        }

        Ok(sorted)
    }
}
