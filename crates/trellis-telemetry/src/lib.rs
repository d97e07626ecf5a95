//! Trellis Telemetry - logging setup for the trellis plugin runtime.
//!
//! The runtime crates only emit `tracing` events; the embedding host decides
//! where they go by installing a subscriber through this crate.
//!
//! # Example
//!
//! ```rust,no_run
//! use trellis_telemetry::{LogConfig, LogFormat, LogLevel, setup_logging};
//!
//! # fn main() -> Result<(), trellis_telemetry::TelemetryError> {
//! let config = LogConfig::new(LogLevel::Info)
//!     .with_format(LogFormat::Compact)
//!     .with_runtime_level(LogLevel::Debug);
//!
//! setup_logging(&config)?;
//! tracing::info!("Host starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogLevel, LogTarget, RUNTIME_TARGET,
    setup_default_logging, setup_logging,
};
