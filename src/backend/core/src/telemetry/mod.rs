//! Telemetry infrastructure: structured logging configuration.

mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig};
