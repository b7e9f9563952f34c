//! Error handling for the Canvasflow execution core.
//!
//! Inside the executor, node failures travel as events on the execution
//! stream, not as `Err` returns; the types here cover the library surface
//! (registry lifecycle, configuration, workflow decoding) where a caller
//! needs a machine-readable code and a severity.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::dag::GraphError;
use crate::plugins::{ManifestError, NodeRunError, RegistryError};

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes, stable for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Graph errors (1000-1099)
    GraphCycleDetected,

    // Execution errors (1100-1199)
    NodeUnavailable,
    NodeExecutionFailed,
    ExecutionCancelled,

    // Plugin errors (2000-2099)
    PluginNotFound,
    PluginLoadFailed,
    PluginStateInvalid,
    ManifestInvalid,

    // Serialization errors (2200-2299)
    SerializationError,

    // Configuration errors (5000-5099)
    ConfigurationError,

    // Internal errors (9000-9099)
    IoError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::GraphCycleDetected => 1000,

            Self::NodeUnavailable => 1100,
            Self::NodeExecutionFailed => 1101,
            Self::ExecutionCancelled => 1102,

            Self::PluginNotFound => 2000,
            Self::PluginLoadFailed => 2001,
            Self::PluginStateInvalid => 2002,
            Self::ManifestInvalid => 2003,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,

            Self::IoError => 9000,
            Self::InternalError => 9099,
        }
    }

    /// How loudly this error should be logged.
    pub const fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ExecutionCancelled => ErrorSeverity::Info,
            Self::GraphCycleDetected
            | Self::NodeUnavailable
            | Self::NodeExecutionFailed
            | Self::PluginNotFound
            | Self::PluginStateInvalid
            | Self::ManifestInvalid
            | Self::SerializationError => ErrorSeverity::Warning,
            Self::PluginLoadFailed
            | Self::ConfigurationError
            | Self::IoError
            | Self::InternalError => ErrorSeverity::Error,
        }
    }
}

/// Severity level for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Top-level error for the execution core's library surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    NodeRun(#[from] NodeRunError),

    #[error("execution cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Graph(GraphError::Cycle { .. }) => ErrorCode::GraphCycleDetected,
            Self::Registry(RegistryError::PluginNotFound(_)) => ErrorCode::PluginNotFound,
            Self::Registry(RegistryError::DeleteWhileActive(_)) => ErrorCode::PluginStateInvalid,
            Self::Registry(RegistryError::Load { .. }) => ErrorCode::PluginLoadFailed,
            Self::Registry(RegistryError::Manifest(_)) | Self::Manifest(_) => {
                ErrorCode::ManifestInvalid
            }
            Self::Registry(RegistryError::Io(_)) | Self::Io(_) => ErrorCode::IoError,
            Self::NodeRun(_) => ErrorCode::NodeExecutionFailed,
            Self::Cancelled => ErrorCode::ExecutionCancelled,
            Self::Config(_) => ErrorCode::ConfigurationError,
            Self::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Log this error at its severity with its code attached.
    pub fn log(&self) {
        let code = self.code();
        match code.severity() {
            ErrorSeverity::Info => tracing::info!(code = ?code, error = %self, "engine error"),
            ErrorSeverity::Warning => warn!(code = ?code, error = %self, "engine error"),
            ErrorSeverity::Error => error!(code = ?code, error = %self, "engine error"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
