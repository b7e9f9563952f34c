//! Workflow validation.
//!
//! Structural checks run on user request before execution: node types
//! exist, edges reference real ports, required inputs are satisfied, the
//! non-back-edge graph is acyclic, loop pairings are well-formed. The
//! validator never mutates its inputs and its output is deterministic:
//! errors before warnings before infos, then node id, then message.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dag::{GraphError, WorkflowGraph};
use crate::plugins::{is_wildcard_kind, RegistrySnapshot};
use crate::workflow::{is_loop_type, Workflow, LOOP_GROUP, LOOP_START};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub level: IssueLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

impl Issue {
    pub fn error(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            node_id: node_id.map(String::from),
            message: message.into(),
        }
    }

    pub fn warning(node_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            node_id: node_id.map(String::from),
            message: message.into(),
        }
    }
}

/// Run every structural check against a workflow and a registry snapshot.
pub fn validate_workflow(workflow: &Workflow, snapshot: &RegistrySnapshot) -> Vec<Issue> {
    let mut issues = Vec::new();

    check_node_types(workflow, snapshot, &mut issues);
    check_edges(workflow, snapshot, &mut issues);
    check_required_inputs(workflow, snapshot, &mut issues);
    check_cycles(workflow, &mut issues);
    check_loop_pairing(workflow, &mut issues);
    check_group_membership(workflow, &mut issues);

    // Deterministic output: errors first, then by node id, then message.
    issues.sort_by(|a, b| {
        (a.level, &a.node_id, &a.message).cmp(&(b.level, &b.node_id, &b.message))
    });
    issues
}

/// Check 1: every node's type is registered or a built-in loop construct.
fn check_node_types(workflow: &Workflow, snapshot: &RegistrySnapshot, issues: &mut Vec<Issue>) {
    for node in &workflow.nodes {
        let node_type = node.node_type.as_str();
        if is_loop_type(node_type) || snapshot.contains(node_type) {
            continue;
        }
        let message = match snapshot.inactive_owner(node_type) {
            Some(owner) => format!(
                "node type '{node_type}' belongs to inactive plugin '{owner}'"
            ),
            None => format!("unknown node type '{node_type}'"),
        };
        issues.push(Issue::error(Some(&node.id), message));
    }
}

/// Checks 2 and 4: edge endpoints and port existence, plus the port-type
/// compatibility warning.
fn check_edges(workflow: &Workflow, snapshot: &RegistrySnapshot, issues: &mut Vec<Issue>) {
    for edge in &workflow.edges {
        let source = workflow.node(&edge.source);
        let target = workflow.node(&edge.target);

        if source.is_none() {
            issues.push(Issue::error(
                None,
                format!("edge '{}' references unknown source node '{}'", edge.id, edge.source),
            ));
        }
        if target.is_none() {
            issues.push(Issue::error(
                None,
                format!("edge '{}' references unknown target node '{}'", edge.id, edge.target),
            ));
        }
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };

        // Port membership is checkable only against a registered spec;
        // loop constructs have convention-driven dynamic ports.
        let source_port = snapshot
            .spec(&source.node_type)
            .map(|spec| spec.output(&edge.source_port).cloned());
        let target_port = snapshot
            .spec(&target.node_type)
            .map(|spec| spec.input(&edge.target_port).cloned());

        if let Some(None) = source_port {
            issues.push(Issue::error(
                Some(&source.id),
                format!(
                    "edge '{}' leaves unknown output port '{}' of type '{}'",
                    edge.id, edge.source_port, source.node_type
                ),
            ));
        }
        if let Some(None) = target_port {
            issues.push(Issue::error(
                Some(&target.id),
                format!(
                    "edge '{}' enters unknown input port '{}' of type '{}'",
                    edge.id, edge.target_port, target.node_type
                ),
            ));
        }

        if let (Some(Some(out_port)), Some(Some(in_port))) = (source_port, target_port) {
            let (out_kind, in_kind) = (out_port.kind.as_str(), in_port.kind.as_str());
            if !out_kind.is_empty()
                && !in_kind.is_empty()
                && !is_wildcard_kind(out_kind)
                && !is_wildcard_kind(in_kind)
                && out_kind != in_kind
            {
                issues.push(Issue::warning(
                    Some(&target.id),
                    format!(
                        "edge '{}' connects {} output '{}' to {} input '{}'",
                        edge.id, out_kind, edge.source_port, in_kind, edge.target_port
                    ),
                ));
            }
        }
    }
}

/// Check 3: required ports are fed by an edge, a param, or a default.
fn check_required_inputs(
    workflow: &Workflow,
    snapshot: &RegistrySnapshot,
    issues: &mut Vec<Issue>,
) {
    let mut connected: HashSet<(&str, &str)> = HashSet::new();
    for edge in &workflow.edges {
        connected.insert((edge.target.as_str(), edge.target_port.as_str()));
    }

    for node in &workflow.nodes {
        let Some(spec) = snapshot.spec(&node.node_type) else {
            continue;
        };
        for port in &spec.ports_in {
            if !port.required {
                continue;
            }
            let satisfied = connected.contains(&(node.id.as_str(), port.name.as_str()))
                || node.param(&port.name).is_some()
                || port.default.as_ref().is_some_and(|d| !d.is_null());
            if !satisfied {
                issues.push(Issue::error(
                    Some(&node.id),
                    format!("required input '{}' has no connection, param, or default", port.name),
                ));
            }
        }
    }
}

/// Check 5: the graph without back-edges must be acyclic.
fn check_cycles(workflow: &Workflow, issues: &mut Vec<Issue>) {
    if let Err(GraphError::Cycle { node_id }) = WorkflowGraph::build(workflow) {
        issues.push(Issue::error(
            Some(&node_id),
            format!("workflow contains a cycle involving node '{node_id}'"),
        ));
    }
}

/// Check 6: loop_end/loop_start pairings are 1-to-1.
fn check_loop_pairing(workflow: &Workflow, issues: &mut Vec<Issue>) {
    let mut paired: HashMap<&str, &str> = HashMap::new();

    for node in &workflow.nodes {
        if node.node_type != crate::workflow::LOOP_END {
            continue;
        }
        let Some(pair_id) = node.param("pair_id").and_then(|v| v.as_str()) else {
            issues.push(Issue::error(
                Some(&node.id),
                format!("loop_end '{}' has no pair_id", node.id),
            ));
            continue;
        };
        match workflow.node(pair_id) {
            Some(start) if start.node_type == LOOP_START => {
                if let Some(other) = paired.get(pair_id) {
                    issues.push(Issue::error(
                        Some(&node.id),
                        format!(
                            "loop_start '{pair_id}' is already paired with loop_end '{other}'"
                        ),
                    ));
                } else {
                    paired.insert(pair_id, node.id.as_str());
                }
            }
            _ => issues.push(Issue::error(
                Some(&node.id),
                format!("loop_end '{}' pairs with '{pair_id}', which is not a loop_start", node.id),
            )),
        }
    }

    for node in &workflow.nodes {
        if node.node_type == LOOP_START && !paired.contains_key(node.id.as_str()) {
            issues.push(Issue::error(
                Some(&node.id),
                format!("loop_start '{}' has no paired loop_end", node.id),
            ));
        }
    }
}

/// Check 7: `parent_id` must reference a loop_group node.
fn check_group_membership(workflow: &Workflow, issues: &mut Vec<Issue>) {
    for node in &workflow.nodes {
        let Some(parent_id) = node.parent_id.as_deref() else {
            continue;
        };
        match workflow.node(parent_id) {
            Some(parent) if parent.node_type == LOOP_GROUP => {}
            Some(parent) => issues.push(Issue::error(
                Some(&node.id),
                format!(
                    "parent '{}' of node '{}' is a '{}', not a loop_group",
                    parent_id, node.id, parent.node_type
                ),
            )),
            None => issues.push(Issue::error(
                Some(&node.id),
                format!("parent '{}' of node '{}' does not exist", parent_id, node.id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{NodeSpec, PortSpec, RunOutput};
    use crate::value::Value;
    use crate::workflow::{WorkflowEdge, WorkflowNode, LOOP_END};
    use serde_json::json;

    fn snapshot() -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::empty();
        snapshot.register(
            NodeSpec::new("gen", "Generate")
                .with_input(PortSpec::new("n", "NUMBER").required())
                .with_output(PortSpec::new("out", "ARRAY")),
            |_, _| Ok(RunOutput::Value(Value::Null)),
        );
        snapshot.register(
            NodeSpec::new("double", "Double")
                .with_input(PortSpec::new("in", "ARRAY").required())
                .with_output(PortSpec::new("out", "ARRAY")),
            |_, _| Ok(RunOutput::Value(Value::Null)),
        );
        snapshot.register(
            NodeSpec::new("stringify", "Stringify")
                .with_input(PortSpec::new("in", "STRING"))
                .with_output(PortSpec::new("out", "STRING")),
            |_, _| Ok(RunOutput::Value(Value::Null)),
        );
        snapshot
    }

    fn errors(issues: &[Issue]) -> Vec<&Issue> {
        issues.iter().filter(|i| i.level == IssueLevel::Error).collect()
    }

    #[test]
    fn test_valid_workflow_has_no_issues() {
        let workflow = Workflow::new("ok")
            .with_node(WorkflowNode::new("a", "gen").with_param("n", json!(3)))
            .with_node(WorkflowNode::new("b", "double"))
            .with_edge(WorkflowEdge::new("e1", "a", "out", "b", "in"));
        assert!(validate_workflow(&workflow, &snapshot()).is_empty());
    }

    #[test]
    fn test_unknown_type_is_error() {
        let workflow = Workflow::new("bad").with_node(WorkflowNode::new("a", "ghost"));
        let issues = validate_workflow(&workflow, &snapshot());
        assert_eq!(errors(&issues).len(), 1);
        assert!(issues[0].message.contains("unknown node type 'ghost'"));
    }

    #[test]
    fn test_inactive_type_mentions_plugin() {
        let mut snap = snapshot();
        snap.mark_inactive_type("sorting/bubble_pass", "sorting/bubble");
        let workflow =
            Workflow::new("bad").with_node(WorkflowNode::new("a", "sorting/bubble_pass"));
        let issues = validate_workflow(&workflow, &snap);
        assert!(issues[0].message.contains("inactive plugin 'sorting/bubble'"));
    }

    #[test]
    fn test_unknown_port_is_error() {
        let workflow = Workflow::new("bad")
            .with_node(WorkflowNode::new("a", "gen").with_param("n", json!(1)))
            .with_node(WorkflowNode::new("b", "double"))
            .with_edge(WorkflowEdge::new("e1", "a", "nope", "b", "in"));
        let issues = validate_workflow(&workflow, &snapshot());
        assert!(issues
            .iter()
            .any(|i| i.message.contains("unknown output port 'nope'")));
    }

    #[test]
    fn test_missing_required_input_names_port() {
        let workflow = Workflow::new("bad").with_node(WorkflowNode::new("a", "gen"));
        let issues = validate_workflow(&workflow, &snapshot());
        assert!(issues
            .iter()
            .any(|i| i.message.contains("required input 'n'")));
    }

    #[test]
    fn test_type_mismatch_is_warning_not_error() {
        let workflow = Workflow::new("mismatch")
            .with_node(WorkflowNode::new("a", "gen").with_param("n", json!(1)))
            .with_node(WorkflowNode::new("b", "stringify"))
            .with_edge(WorkflowEdge::new("e1", "a", "out", "b", "in"));
        let issues = validate_workflow(&workflow, &snapshot());
        assert!(errors(&issues).is_empty());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, IssueLevel::Warning);
    }

    #[test]
    fn test_unpaired_loop_constructs() {
        let workflow = Workflow::new("loops")
            .with_node(WorkflowNode::new("s", LOOP_START))
            .with_node(WorkflowNode::new("e", LOOP_END));
        let issues = validate_workflow(&workflow, &snapshot());
        assert!(issues.iter().any(|i| i.message.contains("has no pair_id")));
        assert!(issues
            .iter()
            .any(|i| i.message.contains("has no paired loop_end")));
    }

    #[test]
    fn test_double_pairing_rejected() {
        let workflow = Workflow::new("loops")
            .with_node(WorkflowNode::new("s", LOOP_START))
            .with_node(WorkflowNode::new("e1", LOOP_END).with_param("pair_id", json!("s")))
            .with_node(WorkflowNode::new("e2", LOOP_END).with_param("pair_id", json!("s")));
        let issues = validate_workflow(&workflow, &snapshot());
        assert!(issues
            .iter()
            .any(|i| i.message.contains("already paired")));
    }

    #[test]
    fn test_parent_must_be_loop_group() {
        let workflow = Workflow::new("group")
            .with_node(WorkflowNode::new("a", "gen").with_param("n", json!(1)))
            .with_node(
                WorkflowNode::new("b", "gen")
                    .with_param("n", json!(1))
                    .with_parent("a"),
            );
        let issues = validate_workflow(&workflow, &snapshot());
        assert!(issues
            .iter()
            .any(|i| i.message.contains("not a loop_group")));
    }

    #[test]
    fn test_output_is_deterministic_and_ordered() {
        let workflow = Workflow::new("messy")
            .with_node(WorkflowNode::new("z", "ghost"))
            .with_node(WorkflowNode::new("a", "ghost"))
            .with_node(WorkflowNode::new("m", "gen").with_param("n", json!(1)))
            .with_node(WorkflowNode::new("s", "stringify"))
            .with_edge(WorkflowEdge::new("e1", "m", "out", "s", "in"));

        let first = validate_workflow(&workflow, &snapshot());
        let second = validate_workflow(&workflow, &snapshot());
        assert_eq!(first, second);

        // Errors precede warnings; within a level node ids are sorted.
        assert_eq!(first[0].node_id.as_deref(), Some("a"));
        assert_eq!(first[1].node_id.as_deref(), Some("z"));
        assert_eq!(first.last().unwrap().level, IssueLevel::Warning);
    }
}
