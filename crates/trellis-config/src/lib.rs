#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Layered configuration for the trellis plugin runtime.
//!
//! # Usage
//!
//! ```rust,no_run
//! use trellis_config::Config;
//!
//! let config = Config::load().unwrap();
//! println!("Plugins live in {}", config.plugins.root);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **User** (`~/.trellis/config.toml`)
//! 2. **Environment variables** (`TRELLIS_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! This crate has **no dependencies on other trellis crates**. Conversion
//! into runtime types happens at the integration boundary, behind the
//! `config` features of `trellis-plugins` and `trellis-telemetry`.

use std::path::Path;

pub mod env;
pub mod error;
pub mod loader;
pub mod merge;
pub mod types;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Defaults, then `~/.trellis/config.toml`, then `TRELLIS_*` fallbacks.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoHomeDir`] without a home directory, otherwise any
    /// read, parse or validation failure of [`loader::load`].
    pub fn load() -> ConfigResult<Self> {
        loader::load(None)
    }

    /// Like [`Config::load`], reading the user layer below `home_dir`.
    ///
    /// # Errors
    ///
    /// Any read, parse or validation failure of [`loader::load`].
    pub fn load_with_home(home_dir: &Path) -> ConfigResult<Self> {
        loader::load(Some(home_dir))
    }

    /// Read exactly one file, without defaults or environment.
    ///
    /// # Errors
    ///
    /// See [`loader::load_file`].
    pub fn load_file(path: &Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
