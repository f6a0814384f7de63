//! # Task Graphs
//!
//! Transient planning structure a stage builder returns to describe a stage's
//! tasks. Graphs nest; a nested [`GraphType::Loop`] graph marks a loop body the
//! executor may rewind. Graphs are never persisted, only flattened into a
//! stage's task list.

use crate::orchestration::errors::{OrchestrationError, OrchestrationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphType {
    /// The complete plan of a simple stage
    Full,
    /// Tasks a branching stage runs before fanning out
    Head,
    /// Tasks a branching stage runs after its branches join
    Tail,
    /// A loop body
    Loop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub work_unit_ref: String,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, work_unit_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            work_unit_ref: work_unit_ref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskNode {
    Definition(TaskDefinition),
    Graph(TaskGraph),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    pub graph_type: GraphType,
    pub nodes: Vec<TaskNode>,
}

/// One leaf of a flattened graph with the boundary flags its position earns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask<'a> {
    pub definition: &'a TaskDefinition,
    pub stage_start: bool,
    pub stage_end: bool,
    pub loop_start: bool,
    pub loop_end: bool,
}

impl<'a> PlannedTask<'a> {
    fn new(definition: &'a TaskDefinition) -> Self {
        Self {
            definition,
            stage_start: false,
            stage_end: false,
            loop_start: false,
            loop_end: false,
        }
    }
}

impl TaskGraph {
    pub fn new(graph_type: GraphType) -> Self {
        Self {
            graph_type,
            nodes: Vec::new(),
        }
    }

    pub fn full() -> Self {
        Self::new(GraphType::Full)
    }

    pub fn with_task(mut self, name: impl Into<String>, work_unit_ref: impl Into<String>) -> Self {
        self.add_task(name, work_unit_ref);
        self
    }

    pub fn with_graph(mut self, graph: TaskGraph) -> Self {
        self.nodes.push(TaskNode::Graph(graph));
        self
    }

    pub fn add_task(&mut self, name: impl Into<String>, work_unit_ref: impl Into<String>) {
        self.nodes
            .push(TaskNode::Definition(TaskDefinition::new(name, work_unit_ref)));
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of task definitions, counting through nested graphs
    pub fn task_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| match node {
                TaskNode::Definition(_) => 1,
                TaskNode::Graph(graph) => graph.task_count(),
            })
            .sum()
    }

    /// Depth-first list of task definitions with boundary flags applied.
    ///
    /// The outermost FULL/HEAD graph puts `stage_start` on its first leaf and
    /// the outermost FULL/TAIL graph puts `stage_end` on its last leaf. Every
    /// LOOP graph, at any depth, flags its own first and last leaf with
    /// `loop_start`/`loop_end` instead.
    pub fn flatten(&self, stage_id: &str) -> OrchestrationResult<Vec<PlannedTask<'_>>> {
        let mut planned = Vec::with_capacity(self.task_count());
        self.collect(stage_id, false, &mut planned)?;
        Ok(planned)
    }

    fn collect<'a>(
        &'a self,
        stage_id: &str,
        nested: bool,
        planned: &mut Vec<PlannedTask<'a>>,
    ) -> OrchestrationResult<()> {
        if nested && matches!(self.graph_type, GraphType::Head | GraphType::Tail) {
            return Err(OrchestrationError::malformed(
                stage_id,
                format!("{:?} graph cannot be nested inside another graph", self.graph_type),
            ));
        }
        if self.graph_type == GraphType::Loop && self.task_count() == 0 {
            return Err(OrchestrationError::malformed(
                stage_id,
                "loop graph contains no tasks",
            ));
        }

        let first = planned.len();
        for node in &self.nodes {
            match node {
                TaskNode::Definition(definition) => planned.push(PlannedTask::new(definition)),
                TaskNode::Graph(graph) => graph.collect(stage_id, true, planned)?,
            }
        }

        let Some(last) = planned.len().checked_sub(1).filter(|last| *last >= first) else {
            return Ok(());
        };

        match (self.graph_type, nested) {
            (GraphType::Loop, _) => {
                planned[first].loop_start = true;
                planned[last].loop_end = true;
            }
            (GraphType::Full, false) => {
                planned[first].stage_start = true;
                planned[last].stage_end = true;
            }
            (GraphType::Head, false) => planned[first].stage_start = true,
            (GraphType::Tail, false) => planned[last].stage_end = true,
            _ => {}
        }

        Ok(())
    }
}
