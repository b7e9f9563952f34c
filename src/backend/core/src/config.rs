//! Configuration management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::telemetry::LoggingConfig;

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Plugin tree configuration
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Executor configuration
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    /// Root of the two-tier plugin tree
    #[serde(default = "default_plugins_root")]
    pub root_dir: PathBuf,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            root_dir: default_plugins_root(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Bound of the per-execution event channel
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Iteration count for loop constructs that configure none
    #[serde(default = "default_iterations")]
    pub default_iterations: u32,

    /// Per-workflow deadline; the cancellation signal fires when it lapses
    #[serde(default, with = "humantime_serde")]
    pub run_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            default_iterations: default_iterations(),
            run_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration, layering (highest precedence last):
    /// defaults, `canvasflow.toml` if present, `CANVASFLOW__*` environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new("canvasflow.toml"))
    }

    /// Load configuration from an explicit file path plus the environment.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("CANVASFLOW").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Execution options derived from the executor section.
    pub fn execution_options(&self) -> crate::dag::ExecutionOptions {
        let mut options = crate::dag::ExecutionOptions {
            default_iterations: self.executor.default_iterations,
            event_buffer_size: self.executor.event_buffer_size,
            ..Default::default()
        };
        options.timeout = self.executor.run_timeout;
        options
    }
}

fn default_plugins_root() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_iterations() -> u32 {
    10
}
