//! Values flowing along workflow edges.
//!
//! The executor treats edge payloads as opaque: it moves them between
//! ports, stacks them on multi-fan-in, and summarizes them for the event
//! stream, but never interprets them. Plugins decide what the payloads
//! mean.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::json;

/// How many leading elements an array summary carries.
const SUMMARY_PREVIEW_LEN: usize = 10;

/// An opaque payload travelling on an edge.
///
/// Most values are plain JSON data. Ports typed `FUNCTION` carry named
/// callables, and a port fed by more than one edge receives a [`Value::Stack`]
/// of the individual payloads in edge order.
#[derive(Clone, Default)]
pub enum Value {
    /// JSON-representable data (scalars, arrays, objects).
    Data(serde_json::Value),
    /// A named callable, produced and consumed by plugins.
    Function(FunctionValue),
    /// Multi-fan-in: the payloads of every edge into one port, in edge order.
    Stack(Vec<Value>),
    /// No value. Fed to plugins for absent optional inputs.
    #[default]
    Null,
}

/// Named values port map: `port name -> value`.
pub type PortValues = BTreeMap<String, Value>;

/// All outputs produced so far: `node id -> port map`.
pub type NodeOutputs = BTreeMap<String, PortValues>;

impl Value {
    /// Wrap a JSON value, mapping JSON null to [`Value::Null`].
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            other => Value::Data(other),
        }
    }

    /// Convenience constructor for a numeric value.
    pub fn number(n: f64) -> Self {
        Value::Data(json!(n))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The underlying JSON data, if this is a data value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Data(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view, used for iteration counts and arithmetic plugins.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(serde_json::Value::as_f64)
    }

    /// Array view: a JSON array's elements, or the members of a stack.
    pub fn as_array(&self) -> Option<Vec<Value>> {
        match self {
            Value::Data(serde_json::Value::Array(items)) => {
                Some(items.iter().cloned().map(Value::from_json).collect())
            }
            Value::Stack(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// Summarize this value for the event stream.
    ///
    /// Arrays longer than ten elements collapse to
    /// `{type:"array", length, first_10}`; functions to
    /// `{type:"function", name}`; everything else passes through as data.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Value::Data(serde_json::Value::Array(items)) => summarize_array(
                items.len(),
                items.iter().take(SUMMARY_PREVIEW_LEN).cloned().collect(),
            ),
            Value::Data(other) => other.clone(),
            Value::Function(f) => json!({ "type": "function", "name": f.name() }),
            Value::Stack(items) => summarize_array(
                items.len(),
                items
                    .iter()
                    .take(SUMMARY_PREVIEW_LEN)
                    .map(Value::summary)
                    .collect(),
            ),
            Value::Null => serde_json::Value::Null,
        }
    }
}

fn summarize_array(length: usize, preview: Vec<serde_json::Value>) -> serde_json::Value {
    if length > SUMMARY_PREVIEW_LEN {
        json!({ "type": "array", "length": length, "first_10": preview })
    } else {
        serde_json::Value::Array(preview)
    }
}

/// Summarize a whole port map for a `node_complete` event.
pub fn summarize_outputs(outputs: &PortValues) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = outputs
        .iter()
        .map(|(name, value)| (name.clone(), value.summary()))
        .collect();
    serde_json::Value::Object(map)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.name() == b.name(),
            (Value::Stack(a), Value::Stack(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(v) => write!(f, "Data({v})"),
            Value::Function(func) => write!(f, "Function({})", func.name()),
            Value::Stack(items) => f.debug_tuple("Stack").field(items).finish(),
            Value::Null => write!(f, "Null"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from_json(value)
    }
}

/// A named callable carried on a `FUNCTION` port.
#[derive(Clone)]
pub struct FunctionValue {
    name: String,
    func: Arc<dyn Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync>,
}

impl FunctionValue {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the callable with positional arguments.
    pub fn call(&self, args: Vec<Value>) -> anyhow::Result<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("name", &self.name)
            .finish()
    }
}
