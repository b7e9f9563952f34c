//! DAG scheduling for workflow execution.
//!
//! This module handles:
//! - Topological ordering over the non-feedback subgraph
//! - Cycle detection (back-edges and loop-group feedback excluded)
//! - Loop-group child lists, precomputed per container
//! - The executor and the three loop drivers

mod event;
mod executor;
mod loops;

pub use event::{ExecErrorKind, ExecutionEvent, UnavailableReason};
pub use executor::{
    execute, ExecutionHandle, ExecutionOptions, ExecutionSummary, NodeStatus, WorkflowExecutor,
};

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::workflow::{Workflow, WorkflowEdge, LOOP_GROUP};

/// Errors building the scheduling graph.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("workflow contains a cycle involving node '{node_id}'")]
    Cycle { node_id: String },
}

/// Whether an edge carries loop feedback and is therefore excluded from
/// scheduling and cycle checks: either an explicit back-edge, or an
/// internal loop-group edge from a child back into its own container.
pub fn is_feedback_edge(workflow: &Workflow, edge: &WorkflowEdge) -> bool {
    if edge.is_back_edge {
        return true;
    }
    match (workflow.node(&edge.target), workflow.node(&edge.source)) {
        (Some(target), Some(source)) => {
            target.node_type == LOOP_GROUP && source.parent_id.as_deref() == Some(edge.target.as_str())
        }
        _ => false,
    }
}

/// The scheduling view of a workflow: topological order over non-feedback
/// edges, split into the top-level sequence and per-loop-group child lists.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Top-level nodes (no `parent_id`) in topological order.
    top_level: Vec<String>,
    /// Loop-group id -> child node ids in subgraph topological order.
    children: HashMap<String, Vec<String>>,
    stats: GraphStats,
}

impl WorkflowGraph {
    /// Build the scheduling graph. Edges with unknown endpoints are
    /// skipped (the validator reports them); a cycle in the remaining
    /// graph is an error.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut node_index: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &workflow.nodes {
            let idx = graph.add_node(node.id.clone());
            node_index.insert(node.id.as_str(), idx);
        }

        let mut back_edges = 0usize;
        for edge in &workflow.edges {
            if is_feedback_edge(workflow, edge) {
                back_edges += 1;
                continue;
            }
            let (Some(&source), Some(&target)) = (
                node_index.get(edge.source.as_str()),
                node_index.get(edge.target.as_str()),
            ) else {
                continue;
            };
            graph.add_edge(source, target, ());
        }

        let order = toposort(&graph, None).map_err(|cycle| GraphError::Cycle {
            node_id: graph[cycle.node_id()].clone(),
        })?;

        // A parent reference only claims a node when it points at an
        // actual loop_group; anything else falls back to the top level
        // (and is flagged by the validator).
        let is_group_child = |id: &str| -> Option<String> {
            let node = workflow.node(id)?;
            let parent_id = node.parent_id.as_deref()?;
            let parent = workflow.node(parent_id)?;
            (parent.node_type == LOOP_GROUP).then(|| parent_id.to_string())
        };

        let mut top_level = Vec::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut loop_groups = 0usize;
        for idx in order {
            let id = graph[idx].clone();
            match is_group_child(&id) {
                Some(parent_id) => children.entry(parent_id).or_default().push(id),
                None => top_level.push(id),
            }
        }
        for node in &workflow.nodes {
            if node.node_type == LOOP_GROUP {
                loop_groups += 1;
                children.entry(node.id.clone()).or_default();
            }
        }

        Ok(Self {
            top_level,
            children,
            stats: GraphStats {
                nodes: workflow.nodes.len(),
                edges: workflow.edges.len(),
                back_edges,
                loop_groups,
            },
        })
    }

    /// Top-level nodes in execution order.
    pub fn top_level(&self) -> &[String] {
        &self.top_level
    }

    /// A loop group's children in subgraph execution order.
    pub fn children_of(&self, group_id: &str) -> &[String] {
        self.children
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }
}

/// Size and shape counters for observability surfaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub back_edges: usize,
    pub loop_groups: usize,
}
