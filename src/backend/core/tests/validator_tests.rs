//! Integration tests for workflow validation.

use canvasflow_core::plugins::{NodeSpec, PortSpec, RegistrySnapshot, RunOutput};
use canvasflow_core::validation::{validate_workflow, IssueLevel};
use canvasflow_core::value::Value;
use canvasflow_core::workflow::{Workflow, WorkflowEdge, WorkflowNode, LOOP_END, LOOP_START};
use serde_json::json;

fn snapshot() -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::empty();
    snapshot.register(
        NodeSpec::new("step", "Step")
            .with_input(PortSpec::new("in", "ARRAY"))
            .with_output(PortSpec::new("out", "ARRAY")),
        |_, mut args| Ok(RunOutput::Value(args.remove(0))),
    );
    snapshot
}

fn chain_cycle(back_edge: bool) -> Workflow {
    let mut closing = WorkflowEdge::new("e3", "c", "out", "a", "in");
    if back_edge {
        closing = closing.back_edge();
    }
    Workflow::new("ring")
        .with_node(WorkflowNode::new("a", "step"))
        .with_node(WorkflowNode::new("b", "step"))
        .with_node(WorkflowNode::new("c", "step"))
        .with_edge(WorkflowEdge::new("e1", "a", "out", "b", "in"))
        .with_edge(WorkflowEdge::new("e2", "b", "out", "c", "in"))
        .with_edge(closing)
}

#[test]
fn test_cycle_reported_with_participant() {
    let issues = validate_workflow(&chain_cycle(false), &snapshot());

    let cycle_errors: Vec<_> = issues
        .iter()
        .filter(|i| i.level == IssueLevel::Error && i.message.contains("cycle"))
        .collect();
    assert_eq!(cycle_errors.len(), 1);
    let participant = cycle_errors[0].node_id.as_deref().unwrap();
    assert!(["a", "b", "c"].contains(&participant));
}

#[test]
fn test_back_edge_suppresses_cycle_error() {
    let issues = validate_workflow(&chain_cycle(true), &snapshot());
    assert!(!issues.iter().any(|i| i.message.contains("cycle")));
}

#[test]
fn test_well_formed_paired_loop_passes() {
    let workflow = Workflow::new("paired")
        .with_node(
            WorkflowNode::new("s", LOOP_START)
                .with_param("iterations", json!(2))
                .with_param("in_1", json!(0)),
        )
        .with_node(WorkflowNode::new("body", "step"))
        .with_node(WorkflowNode::new("e", LOOP_END).with_param("pair_id", json!("s")))
        .with_edge(WorkflowEdge::new("e1", "s", "out_1", "body", "in"))
        .with_edge(WorkflowEdge::new("e2", "body", "out", "e", "in_1"));

    let issues = validate_workflow(&workflow, &snapshot());
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn test_required_input_satisfied_by_edge_param_or_default() {
    let mut snap = snapshot();
    snap.register(
        NodeSpec::new("needy", "Needy")
            .with_input(PortSpec::new("must", "NUMBER").required())
            .with_output(PortSpec::new("out", "NUMBER")),
        |_, _| Ok(RunOutput::Value(Value::Null)),
    );
    snap.register(
        NodeSpec::new("cosy", "Cosy")
            .with_input(PortSpec::new("must", "NUMBER").required().with_default(json!(1)))
            .with_output(PortSpec::new("out", "NUMBER")),
        |_, _| Ok(RunOutput::Value(Value::Null)),
    );

    // Unsatisfied.
    let workflow = Workflow::new("w").with_node(WorkflowNode::new("n", "needy"));
    assert_eq!(validate_workflow(&workflow, &snap).len(), 1);

    // Satisfied by param.
    let workflow =
        Workflow::new("w").with_node(WorkflowNode::new("n", "needy").with_param("must", json!(2)));
    assert!(validate_workflow(&workflow, &snap).is_empty());

    // Satisfied by default.
    let workflow = Workflow::new("w").with_node(WorkflowNode::new("n", "cosy"));
    assert!(validate_workflow(&workflow, &snap).is_empty());

    // Satisfied by edge.
    let workflow = Workflow::new("w")
        .with_node(WorkflowNode::new("src", "cosy"))
        .with_node(WorkflowNode::new("n", "needy"))
        .with_edge(WorkflowEdge::new("e1", "src", "out", "n", "must"));
    assert!(validate_workflow(&workflow, &snap).is_empty());
}

#[test]
fn test_validator_is_pure() {
    let workflow = chain_cycle(false);
    let snap = snapshot();
    assert_eq!(
        validate_workflow(&workflow, &snap),
        validate_workflow(&workflow, &snap)
    );
}

#[test]
fn test_validator_does_not_mutate_workflow() {
    let workflow = chain_cycle(false);
    let before = workflow.to_json().unwrap();
    validate_workflow(&workflow, &snapshot());
    assert_eq!(workflow.to_json().unwrap(), before);
}
