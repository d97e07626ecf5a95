//! Configuration errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// The file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A layer is not valid TOML, or the merged layers do not fit [`Config`](crate::Config).
    #[error("cannot parse {origin}: {source}")]
    Parse {
        /// A file path, or `<embedded defaults>` / `<merged config>`.
        origin: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A config file exceeds the size cap and was not parsed.
    #[error("{} is {size} bytes, over the {limit} byte limit", path.display())]
    TooLarge {
        /// The file.
        path: PathBuf,
        /// Its size.
        size: u64,
        /// The cap.
        limit: u64,
    },

    /// A value is out of range after merging.
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Dotted key, e.g. `logging.level`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// No home directory to resolve `~` and the user layer against.
    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
