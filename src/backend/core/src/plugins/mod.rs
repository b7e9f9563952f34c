//! # Node Plugins
//!
//! A plugin system supplying the node types a workflow can reference.
//!
//! ## Architecture
//!
//! - **Manifest**: project-level defaults (version, description, category
//!   colors) shallow-overridden by plugin-level metadata, parsed from
//!   `project.toml` / definition files inside the two-tier plugin tree.
//! - **Registry**: discovery, activation state, and lifecycle
//!   (activate / deactivate / delete) of every plugin, plus the
//!   authoritative node-type maps handed to the validator and executor.
//! - **Executor table**: compiled-in `run` functions and lifecycle hooks,
//!   resolved by symbol from plugin definition files.
//! - **NodeExecutor**: the registration-time wrapper that adapts a
//!   positional `run` into the uniform `(params, inputs) -> outputs` form
//!   the executor invokes.
//!
//! ## Directory Layout
//!
//! ```text
//! plugins/
//! +-- imaging/
//! |   +-- project.toml
//! |   +-- nodes/
//! |       +-- blur.toml            <- simple plugin "imaging/blur"
//! |       +-- resize/
//! |           +-- plugin.toml      <- complex plugin "imaging/resize"
//! +-- sorting/
//!     +-- project.toml
//!     +-- nodes/
//!         +-- bubble.toml
//! ```

pub mod builtin;
pub mod manifest;
pub mod registry;
pub mod state;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::value::{PortValues, Value};

pub use manifest::{ManifestError, NodeDefinition, PluginDefinition, PluginManifest, ProjectManifest};
pub use registry::{NodeRegistry, PluginRecord, PluginState, RegistryError, RegistrySnapshot};
pub use state::PluginStates;

// ═══════════════════════════════════════════════════════════════════════════════
// Port & Node Specifications
// ═══════════════════════════════════════════════════════════════════════════════

/// Port type tags with wildcard semantics in the validator's
/// type-compatibility check.
const WILDCARD_KINDS: [&str; 2] = ["ANY", "*"];

/// Whether a port type tag matches anything.
pub fn is_wildcard_kind(kind: &str) -> bool {
    WILDCARD_KINDS.contains(&kind)
}

/// An input or output port on a node type.
///
/// The `kind` tag (`ARRAY`, `NUMBER`, `STRING`, `FUNCTION`, or any
/// domain-extended string) has no enforced semantics beyond UI coloring
/// and the validator's compatibility warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub required: bool,

    /// Fallback value when the port has neither an edge nor a param.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// The declarative half of a node type: what the canvas renders and the
/// validator checks. A spec without an executor is a container-only type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub node_type: String,

    pub label: String,

    /// Display grouping in the node palette.
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: String,

    /// Longer usage documentation shown in the side panel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    /// Ordered input ports. Order is the positional `run` convention.
    #[serde(default, rename = "inputs")]
    pub ports_in: Vec<PortSpec>,

    /// Ordered output ports.
    #[serde(default, rename = "outputs")]
    pub ports_out: Vec<PortSpec>,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            label: label.into(),
            category: String::new(),
            description: String::new(),
            doc: None,
            ports_in: Vec::new(),
            ports_out: Vec::new(),
        }
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.ports_in.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.ports_out.push(port);
        self
    }

    pub fn input(&self, name: &str) -> Option<&PortSpec> {
        self.ports_in.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSpec> {
        self.ports_out.iter().find(|p| p.name == name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Run Functions
// ═══════════════════════════════════════════════════════════════════════════════

/// What a `run` function may return.
///
/// A tuple is zipped onto `ports_out` by position; a bare value is allowed
/// only for single-output nodes. Returning a mapping is reserved for future
/// semantics and rejected by the wrapper.
#[derive(Debug)]
pub enum RunOutput {
    Value(Value),
    Tuple(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A node implementation: positional inputs in `ports_in` order.
pub type RunFn =
    Arc<dyn Fn(&mut RunContext, Vec<Value>) -> anyhow::Result<RunOutput> + Send + Sync>;

/// Per-invocation context handed to `run` functions.
///
/// Log lines are buffered here and surfaced on the event stream between
/// the node's `node_start` and `node_complete` events.
#[derive(Debug, Default)]
pub struct RunContext {
    node_id: String,
    logs: Vec<(LogLevel, String)>,
}

/// Severity of a plugin log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl RunContext {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            logs: Vec::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push((level, message.into()));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    /// Drain buffered log lines for emission.
    pub fn take_logs(&mut self) -> Vec<(LogLevel, String)> {
        std::mem::take(&mut self.logs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors produced when invoking a wrapped node executor.
#[derive(Debug, thiserror::Error)]
pub enum NodeRunError {
    #[error("run returned a tuple of {got} values, node declares {expected} outputs")]
    TupleArity { expected: usize, got: usize },

    #[error("run returned a single value but node declares {expected} outputs")]
    SingleValueArity { expected: usize },

    #[error("run returned a mapping; mapping returns are reserved and not allowed")]
    MapReturn,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl NodeRunError {
    /// A trace string for the event stream: the full error chain.
    pub fn trace(&self) -> String {
        match self {
            NodeRunError::Failed(err) => format!("{err:?}"),
            other => other.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NodeExecutor (the wrapper)
// ═══════════════════════════════════════════════════════════════════════════════

/// A node type's `run` function wrapped into the uniform executable form.
///
/// The wrapper feeds inputs positionally in `ports_in` order, drawing from
/// (in priority) the gathered edge value, the node's params, the port
/// default, otherwise null; and normalizes the return shape onto
/// `ports_out`.
#[derive(Clone)]
pub struct NodeExecutor {
    spec: Arc<NodeSpec>,
    run: RunFn,
}

impl NodeExecutor {
    pub fn new(spec: Arc<NodeSpec>, run: RunFn) -> Self {
        Self { spec, run }
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Invoke the wrapped `run` with the uniform `(params, inputs)` form.
    pub fn execute(
        &self,
        ctx: &mut RunContext,
        params: &serde_json::Map<String, serde_json::Value>,
        inputs: &PortValues,
    ) -> Result<PortValues, NodeRunError> {
        let args: Vec<Value> = self
            .spec
            .ports_in
            .iter()
            .map(|port| {
                if let Some(value) = inputs.get(&port.name) {
                    value.clone()
                } else if let Some(param) = params.get(&port.name).filter(|v| !v.is_null()) {
                    Value::from_json(param.clone())
                } else if let Some(default) = &port.default {
                    Value::from_json(default.clone())
                } else {
                    Value::Null
                }
            })
            .collect();

        let output = (self.run)(ctx, args)?;
        self.normalize(output)
    }

    /// Map a `run` return shape onto named output ports.
    fn normalize(&self, output: RunOutput) -> Result<PortValues, NodeRunError> {
        let ports_out = &self.spec.ports_out;
        match output {
            RunOutput::Map(_) => Err(NodeRunError::MapReturn),
            RunOutput::Tuple(values) => {
                if values.len() != ports_out.len() {
                    return Err(NodeRunError::TupleArity {
                        expected: ports_out.len(),
                        got: values.len(),
                    });
                }
                Ok(ports_out
                    .iter()
                    .zip(values)
                    .map(|(port, value)| (port.name.clone(), value))
                    .collect())
            }
            RunOutput::Value(value) => match ports_out.len() {
                1 => Ok(BTreeMap::from([(ports_out[0].name.clone(), value)])),
                0 if value.is_null() => Ok(BTreeMap::new()),
                expected => Err(NodeRunError::SingleValueArity { expected }),
            },
        }
    }
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("node_type", &self.spec.node_type)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lifecycle Hooks
// ═══════════════════════════════════════════════════════════════════════════════

/// Optional lifecycle hooks a plugin may bind via its `hooks` symbol.
///
/// Hook failures are logged and suppressed; the state transition that
/// triggered the hook still takes effect.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    async fn on_activate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_deactivate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_uninstall(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Executor Table
// ═══════════════════════════════════════════════════════════════════════════════

/// Compiled-in implementations resolvable from plugin definition files.
///
/// A definition file binds each of its nodes to a `run` symbol (and the
/// plugin optionally to a `hooks` symbol); the table maps those symbols to
/// the actual callables. Discovery records an unresolvable symbol as a
/// per-plugin load error.
#[derive(Clone, Default)]
pub struct ExecutorTable {
    run_fns: HashMap<String, RunFn>,
    hooks: HashMap<String, Arc<dyn PluginHooks>>,
}

impl ExecutorTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-populated with the standard node pack.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        builtin::install(&mut table);
        table
    }

    pub fn register_run<F>(&mut self, symbol: impl Into<String>, run: F)
    where
        F: Fn(&mut RunContext, Vec<Value>) -> anyhow::Result<RunOutput> + Send + Sync + 'static,
    {
        self.run_fns.insert(symbol.into(), Arc::new(run));
    }

    pub fn register_hooks(&mut self, symbol: impl Into<String>, hooks: Arc<dyn PluginHooks>) {
        self.hooks.insert(symbol.into(), hooks);
    }

    pub fn run_fn(&self, symbol: &str) -> Option<RunFn> {
        self.run_fns.get(symbol).cloned()
    }

    pub fn hooks(&self, symbol: &str) -> Option<Arc<dyn PluginHooks>> {
        self.hooks.get(symbol).cloned()
    }
}

impl std::fmt::Debug for ExecutorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorTable")
            .field("run_fns", &self.run_fns.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_two_in_two_out() -> Arc<NodeSpec> {
        Arc::new(
            NodeSpec::new("test/pair", "Pair")
                .with_input(PortSpec::new("a", "NUMBER"))
                .with_input(PortSpec::new("b", "NUMBER").with_default(json!(5)))
                .with_output(PortSpec::new("sum", "NUMBER"))
                .with_output(PortSpec::new("diff", "NUMBER")),
        )
    }

    fn pair_executor() -> NodeExecutor {
        NodeExecutor::new(
            spec_two_in_two_out(),
            Arc::new(|_, args| {
                let a = args[0].as_f64().unwrap_or(0.0);
                let b = args[1].as_f64().unwrap_or(0.0);
                Ok(RunOutput::Tuple(vec![
                    Value::number(a + b),
                    Value::number(a - b),
                ]))
            }),
        )
    }

    #[test]
    fn test_tuple_zipped_to_output_names() {
        let exec = pair_executor();
        let mut ctx = RunContext::new("n1");
        let inputs = PortValues::from([
            ("a".to_string(), Value::number(7.0)),
            ("b".to_string(), Value::number(3.0)),
        ]);
        let out = exec.execute(&mut ctx, &serde_json::Map::new(), &inputs).unwrap();
        assert_eq!(out["sum"], Value::number(10.0));
        assert_eq!(out["diff"], Value::number(4.0));
    }

    #[test]
    fn test_input_precedence_edge_param_default() {
        let exec = pair_executor();
        let mut ctx = RunContext::new("n1");

        // No edge, no param: default for b, null -> 0 for a.
        let out = exec
            .execute(&mut ctx, &serde_json::Map::new(), &PortValues::new())
            .unwrap();
        assert_eq!(out["diff"], Value::number(-5.0));

        // Param overrides default.
        let mut params = serde_json::Map::new();
        params.insert("b".into(), json!(1));
        let out = exec.execute(&mut ctx, &params, &PortValues::new()).unwrap();
        assert_eq!(out["diff"], Value::number(-1.0));

        // Edge overrides param.
        let inputs = PortValues::from([("b".to_string(), Value::number(2.0))]);
        let out = exec.execute(&mut ctx, &params, &inputs).unwrap();
        assert_eq!(out["diff"], Value::number(-2.0));
    }

    #[test]
    fn test_tuple_arity_mismatch_rejected() {
        let exec = NodeExecutor::new(
            spec_two_in_two_out(),
            Arc::new(|_, _| Ok(RunOutput::Tuple(vec![Value::number(1.0)]))),
        );
        let mut ctx = RunContext::new("n1");
        let err = exec
            .execute(&mut ctx, &serde_json::Map::new(), &PortValues::new())
            .unwrap_err();
        assert!(matches!(err, NodeRunError::TupleArity { expected: 2, got: 1 }));
    }

    #[test]
    fn test_bare_value_allowed_for_single_output() {
        let spec = Arc::new(
            NodeSpec::new("test/one", "One").with_output(PortSpec::new("out", "NUMBER")),
        );
        let exec =
            NodeExecutor::new(spec, Arc::new(|_, _| Ok(RunOutput::Value(Value::number(9.0)))));
        let mut ctx = RunContext::new("n1");
        let out = exec
            .execute(&mut ctx, &serde_json::Map::new(), &PortValues::new())
            .unwrap();
        assert_eq!(out["out"], Value::number(9.0));
    }

    #[test]
    fn test_map_return_rejected() {
        let exec = NodeExecutor::new(
            spec_two_in_two_out(),
            Arc::new(|_, _| Ok(RunOutput::Map(BTreeMap::new()))),
        );
        let mut ctx = RunContext::new("n1");
        let err = exec
            .execute(&mut ctx, &serde_json::Map::new(), &PortValues::new())
            .unwrap_err();
        assert!(matches!(err, NodeRunError::MapReturn));
    }

    #[test]
    fn test_run_context_buffers_logs() {
        let mut ctx = RunContext::new("n1");
        ctx.log_info("one");
        ctx.log_warning("two");
        let logs = ctx.take_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0], (LogLevel::Info, "one".to_string()));
        assert!(ctx.take_logs().is_empty());
    }

    #[test]
    fn test_wildcard_kinds() {
        assert!(is_wildcard_kind("ANY"));
        assert!(is_wildcard_kind("*"));
        assert!(!is_wildcard_kind("NUMBER"));
    }
}
