//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while turning a [`LogConfig`](crate::LogConfig) into an
/// installed subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A level, format or rotation name was not recognized.
    #[error("unknown {kind} '{value}'")]
    UnknownValue {
        /// What was being parsed ("log level", "log format", ...).
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A filter directive does not parse.
    #[error("invalid filter directive '{directive}': {message}")]
    InvalidDirective {
        /// The offending directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// The log directory could not be created.
    #[error("cannot create log directory {}: {source}", path.display())]
    LogDirectory {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The rolling file appender refused its settings.
    #[error("cannot open log files: {0}")]
    Appender(String),

    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
