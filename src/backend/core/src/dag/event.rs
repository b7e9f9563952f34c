//! Events emitted during workflow execution.
//!
//! The wire format: each event is a JSON object with an `event`
//! discriminator and a `timestamp` in float seconds since epoch, plus the
//! event-specific fields. Consumers (the WebSocket layer, the log panel)
//! forward these objects verbatim.

use serde::{Deserialize, Serialize};

use crate::plugins::LogLevel;

// =============================================================================
// Error taxonomy on the stream
// =============================================================================

/// Kind of a `node_error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecErrorKind {
    /// The node's `run` raised or panicked.
    Runtime,
    /// The node's type is not executable from the registry snapshot.
    Unavailable,
    /// A validator-missed cycle made the workflow unschedulable.
    Cycle,
}

/// Why a node type was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The owning plugin is present but inactive: activate it.
    Inactive,
    /// No plugin declares this type: a plugin is missing.
    Unknown,
}

// =============================================================================
// Events
// =============================================================================

/// One event on the execution stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Execution is starting.
    Start { timestamp: f64, total_nodes: usize },

    /// A node began executing.
    NodeStart {
        timestamp: f64,
        node_id: String,
        node_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        loop_index: Option<u32>,
    },

    /// A node finished; `outputs` is the summarized snapshot.
    NodeComplete {
        timestamp: f64,
        node_id: String,
        outputs: serde_json::Value,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        loop_index: Option<u32>,
    },

    /// A node failed; execution halts after this event.
    NodeError {
        timestamp: f64,
        node_id: String,
        error: String,
        stack_trace: String,
        kind: ExecErrorKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<UnavailableReason>,
    },

    /// A node hit a breakpoint and is waiting for resume.
    NodeBreakpoint { timestamp: f64, node_id: String },

    /// A log line emitted by a plugin through its injected logger.
    Log {
        timestamp: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        level: LogLevel,
        message: String,
    },

    /// Execution finished successfully.
    Complete { timestamp: f64, total_ms: u64 },

    /// Execution halted on the cancellation signal.
    Cancelled { timestamp: f64 },
}

fn now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl ExecutionEvent {
    pub fn start(total_nodes: usize) -> Self {
        Self::Start {
            timestamp: now(),
            total_nodes,
        }
    }

    pub fn node_start(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        loop_index: Option<u32>,
    ) -> Self {
        Self::NodeStart {
            timestamp: now(),
            node_id: node_id.into(),
            node_type: node_type.into(),
            loop_index,
        }
    }

    pub fn node_complete(
        node_id: impl Into<String>,
        outputs: serde_json::Value,
        duration_ms: u64,
        loop_index: Option<u32>,
    ) -> Self {
        Self::NodeComplete {
            timestamp: now(),
            node_id: node_id.into(),
            outputs,
            duration_ms,
            loop_index,
        }
    }

    pub fn node_error(
        node_id: impl Into<String>,
        error: impl Into<String>,
        stack_trace: impl Into<String>,
        kind: ExecErrorKind,
        reason: Option<UnavailableReason>,
    ) -> Self {
        Self::NodeError {
            timestamp: now(),
            node_id: node_id.into(),
            error: error.into(),
            stack_trace: stack_trace.into(),
            kind,
            reason,
        }
    }

    pub fn node_breakpoint(node_id: impl Into<String>) -> Self {
        Self::NodeBreakpoint {
            timestamp: now(),
            node_id: node_id.into(),
        }
    }

    pub fn log(node_id: Option<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            timestamp: now(),
            node_id,
            level,
            message: message.into(),
        }
    }

    pub fn complete(total_ms: u64) -> Self {
        Self::Complete {
            timestamp: now(),
            total_ms,
        }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled { timestamp: now() }
    }

    /// The node this event concerns, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStart { node_id, .. }
            | Self::NodeComplete { node_id, .. }
            | Self::NodeError { node_id, .. }
            | Self::NodeBreakpoint { node_id, .. } => Some(node_id),
            Self::Log { node_id, .. } => node_id.as_deref(),
            _ => None,
        }
    }
}
