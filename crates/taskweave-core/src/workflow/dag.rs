//! Batch planning over the task dependency graph.
//!
//! Tasks become nodes of a `petgraph` `DiGraph` with an edge from each
//! dependency to its dependent. Topological leveling (Kahn's algorithm, one
//! level at a time) yields the batches: every task's dependencies sit in a
//! strictly earlier batch. Nodes left with unresolved in-edges after leveling
//! are on, or downstream of, a cycle.

use std::cmp::Reverse;
use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use taskweave_types::error::WorkflowError;

use super::task::Task;

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// Ordered batches of task ids. Batch 0 runs first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub batches: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Group `tasks` into batches.
///
/// Within a batch, tasks are ordered by priority descending, ties broken by
/// submission order. Fails with `DuplicateTask`, `UnknownDependency`, or
/// `CycleDetected` (listing unresolved ids in submission order).
pub fn build_execution_plan(tasks: &[Task]) -> Result<ExecutionPlan, WorkflowError> {
    if tasks.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    let mut id_to_idx: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    for (i, task) in tasks.iter().enumerate() {
        if id_to_idx.insert(task.id.as_str(), i).is_some() {
            return Err(WorkflowError::DuplicateTask(task.id.clone()));
        }
    }

    // Node weight is the submission index; NodeIndex matches it.
    let mut graph = DiGraph::<usize, ()>::with_capacity(tasks.len(), tasks.len());
    let nodes: Vec<NodeIndex> = (0..tasks.len()).map(|i| graph.add_node(i)).collect();

    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.dependencies {
            let from = id_to_idx.get(dep.as_str()).ok_or_else(|| WorkflowError::UnknownDependency {
                task: task.id.clone(),
                dependency: dep.clone(),
            })?;
            graph.add_edge(nodes[*from], nodes[i], ());
        }
    }

    let mut in_degree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let batch_order = |idx: &usize| (Reverse(tasks[*idx].priority), *idx);

    let mut ready: Vec<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut batches = Vec::new();
    let mut resolved = 0;

    while !ready.is_empty() {
        ready.sort_by_key(batch_order);

        let mut next = Vec::new();
        for &idx in &ready {
            for dependent in graph.neighbors_directed(nodes[idx], Direction::Outgoing) {
                let d = graph[dependent];
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    next.push(d);
                }
            }
        }

        resolved += ready.len();
        batches.push(ready.iter().map(|&idx| tasks[idx].id.clone()).collect());
        ready = next;
    }

    if resolved < tasks.len() {
        let unresolved = (0..tasks.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| tasks[i].id.clone())
            .collect();
        return Err(WorkflowError::CycleDetected(unresolved));
    }

    Ok(ExecutionPlan { batches })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
