//! Workflow definitions and their persisted JSON form.
//!
//! A workflow is the graph the canvas edits: nodes with typed ports and
//! the edges wiring them together. Fields the core does not know about
//! are preserved so a decode/encode round-trip never loses canvas state.

use serde::{Deserialize, Serialize};

/// Node type of the container loop construct.
pub const LOOP_GROUP: &str = "loop_group";
/// Node type opening a paired loop.
pub const LOOP_START: &str = "loop_start";
/// Node type closing a paired loop.
pub const LOOP_END: &str = "loop_end";
/// Node type of the back-edge (n8n-style) loop construct.
pub const LOOP_NODE: &str = "loop_node";

/// Whether `node_type` is one of the built-in loop constructs the
/// executor drives itself (no registry entry required).
pub fn is_loop_type(node_type: &str) -> bool {
    matches!(node_type, LOOP_GROUP | LOOP_START | LOOP_END | LOOP_NODE)
}

/// Canvas position of a node. Display-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node instance in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node id.
    pub id: String,

    /// Name of a registered node type or a built-in loop construct.
    #[serde(rename = "type")]
    pub node_type: String,

    /// Canvas position.
    #[serde(default)]
    pub position: Position,

    /// Scalar/config inputs keyed by port name.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Containing loop-group node id, if this node lives in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Muted nodes pass their inputs through without executing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub muted: bool,

    /// Fields this core does not interpret, preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            params: serde_json::Map::new(),
            parent_id: None,
            muted: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Set a param value (builder style, used heavily in tests).
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    /// Param lookup returning JSON null as absent.
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }
}

/// A directed connection between two ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    /// Unique edge id.
    pub id: String,

    /// Source node id.
    pub source: String,

    /// Output port on the source node.
    pub source_port: String,

    /// Target node id.
    pub target: String,

    /// Input port on the target node.
    pub target_port: String,

    /// Back-edges are excluded from cycle checks and carry loop feedback.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_back_edge: bool,

    /// Unknown fields preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkflowEdge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
            is_back_edge: false,
            extra: serde_json::Map::new(),
        }
    }

    pub fn back_edge(mut self) -> Self {
        self.is_back_edge = true;
        self
    }
}

/// A complete workflow definition.
///
/// Node and edge order is not semantically significant (execution order is
/// topological) but it is preserved through serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,

    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,

    /// Unknown fields preserved on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: WorkflowEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Decode a workflow from its persisted JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Encode a workflow to its persisted JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_unknown_fields() {
        let raw = json!({
            "name": "demo",
            "canvas_zoom": 1.5,
            "nodes": [
                {
                    "id": "a",
                    "type": "gen",
                    "position": { "x": 10.0, "y": 20.0 },
                    "params": { "n": 3 },
                    "ui_color": "#ff0000"
                }
            ],
            "edges": [
                {
                    "id": "e1",
                    "source": "a",
                    "source_port": "out",
                    "target": "a",
                    "target_port": "in",
                    "label": "wire"
                }
            ]
        })
        .to_string();

        let workflow = Workflow::from_json(&raw).unwrap();
        assert_eq!(workflow.nodes[0].extra["ui_color"], "#ff0000");
        assert_eq!(workflow.extra["canvas_zoom"], 1.5);

        let encoded = workflow.to_json().unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        let original: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let workflow = Workflow::new("ordered")
            .with_node(WorkflowNode::new("z", "gen"))
            .with_node(WorkflowNode::new("a", "gen"))
            .with_node(WorkflowNode::new("m", "gen"));

        let decoded = Workflow::from_json(&workflow.to_json().unwrap()).unwrap();
        let ids: Vec<&str> = decoded.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_defaults_are_omitted() {
        let workflow =
            Workflow::new("plain").with_node(WorkflowNode::new("a", "gen"));
        let encoded = workflow.to_json().unwrap();
        assert!(!encoded.contains("muted"));
        assert!(!encoded.contains("parent_id"));
    }

    #[test]
    fn test_loop_type_names() {
        assert!(is_loop_type(LOOP_GROUP));
        assert!(is_loop_type(LOOP_NODE));
        assert!(!is_loop_type("gen"));
    }

    #[test]
    fn test_null_param_is_absent() {
        let node = WorkflowNode::new("a", "gen").with_param("x", json!(null));
        assert!(node.param("x").is_none());
    }
}
