//! # Canvasflow Core
//!
//! The execution core of the Canvasflow visual node workflow engine.
//!
//! ## Architecture
//!
//! - **Plugin Registry**: two-tier discovery of node definitions, lifecycle
//!   state (activate / deactivate / delete) with per-plugin hooks, and the
//!   authoritative node-type maps published as immutable snapshots
//! - **Workflow Validator**: structural checks producing levelled issues in
//!   deterministic order
//! - **DAG Executor**: topological scheduling with multi-fan-in stacking,
//!   muted / unavailable / breakpoint semantics, three loop constructs, and
//!   a lazily consumed event stream
//! - **Telemetry**: structured logging configuration
//!
//! The HTTP/WebSocket transport, the browser canvas, workflow persistence,
//! and plugin upload live outside this crate; they consume the event stream
//! and the registry surface exposed here.

pub mod config;
pub mod dag;
pub mod error;
pub mod plugins;
pub mod telemetry;
pub mod validation;
pub mod value;
pub mod workflow;

pub use error::{EngineError, ErrorCode, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::dag::{
        ExecErrorKind, ExecutionEvent, ExecutionHandle, ExecutionOptions, ExecutionSummary,
        NodeStatus, UnavailableReason, WorkflowExecutor,
    };
    pub use crate::error::{EngineError, ErrorCode, ErrorSeverity, Result};
    pub use crate::plugins::{
        ExecutorTable, NodeRegistry, NodeSpec, PluginHooks, PluginRecord, PluginState, PortSpec,
        RegistrySnapshot, RunContext, RunOutput,
    };
    pub use crate::validation::{validate_workflow, Issue, IssueLevel};
    pub use crate::value::{NodeOutputs, PortValues, Value};
    pub use crate::workflow::{Workflow, WorkflowEdge, WorkflowNode};
}
