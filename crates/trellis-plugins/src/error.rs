//! Errors raised by discovery, loading, lifecycle and management.

use std::fmt;
use std::path::PathBuf;

use semver::Version;

use crate::graph::GraphError;
use crate::metadata::ModuleName;
use crate::state::ModuleState;

/// Which half of the lifecycle a [`PluginError::Lifecycle`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    /// `Module::start`.
    Start,
    /// `Module::stop`.
    Stop,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("activation"),
            Self::Stop => f.write_str("deactivation"),
        }
    }
}

/// Errors from runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Module metadata is missing, malformed or fails a field rule.
    #[error("invalid metadata in {path}: {message}")]
    Validation {
        /// The metadata file (or package) that was rejected.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// The module needs a newer host than the one running.
    #[error("module {name} requires host version {required}, running {host}")]
    Incompatible {
        /// The rejected module.
        name: ModuleName,
        /// Minimum host version the module declares.
        required: Version,
        /// Version of the running host.
        host: Version,
    },

    /// A candidate directory does not hold exactly one entry point plus
    /// its metadata file.
    #[error("invalid module directory {dir}: {reason}")]
    DiscoveryStructure {
        /// The offending directory.
        dir: PathBuf,
        /// Why it was skipped.
        reason: String,
    },

    /// The module could not be loaded across its isolation boundary, or its
    /// extra dependencies could not be resolved.
    #[error("module {name} failed to load: {message}")]
    LoadFailed {
        /// The module that failed to load.
        name: ModuleName,
        /// Failure reason.
        message: String,
    },

    /// Activation or deactivation failed.
    #[error("module {name} {stage} failed: {message}")]
    Lifecycle {
        /// The failing module.
        name: ModuleName,
        /// Start or stop.
        stage: LifecycleStage,
        /// Failure reason, including the cause chain.
        message: String,
    },

    /// The merged dependency graph could not be built. Fatal to startup.
    #[error("dependency graph composition failed: {0}")]
    GraphComposition(#[from] GraphError),

    /// A module with this name is already registered.
    #[error("module already installed: {0}")]
    AlreadyInstalled(ModuleName),

    /// No module with this name is registered.
    #[error("module not found: {0}")]
    NotFound(String),

    /// The module name is invalid.
    #[error("invalid module name: {0}")]
    InvalidName(String),

    /// A state change the lifecycle does not allow.
    #[error("module {name} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The module.
        name: ModuleName,
        /// State the module is in.
        from: ModuleState,
        /// Requested state.
        to: ModuleState,
    },

    /// The install source is neither a directory nor a supported archive.
    #[error("unsupported package at {path}: expected a directory or a .tar.gz/.tgz archive")]
    UnsupportedPackage {
        /// The rejected source path.
        path: PathBuf,
    },

    /// A module archive could not be unpacked.
    #[error("cannot unpack module archive: {message}")]
    Extraction {
        /// What went wrong.
        message: String,
    },

    /// A module archive holds a link or special file.
    #[error("module archive entry {path} is a {entry_type}, only files and directories are allowed")]
    UnsafeEntryType {
        /// Tar entry kind, e.g. `Symlink`.
        entry_type: String,
        /// Entry path inside the archive.
        path: String,
    },

    /// A module archive entry would land outside the extraction directory.
    #[error("module archive entry {path} escapes the extraction directory")]
    PathTraversal {
        /// Entry path inside the archive.
        path: String,
    },

    /// Reading or writing a persisted runtime file failed.
    #[error("preferences error at {path}: {message}")]
    Preferences {
        /// The persisted file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A capability factory failed.
    #[error("failed to instantiate {type_name}: {message}")]
    Instantiation {
        /// The capability type.
        type_name: String,
        /// Failure reason.
        message: String,
    },

    /// One or more modules failed during a bulk operation.
    #[error(transparent)]
    Bulk(#[from] BulkFailure),

    /// Filesystem failure on the plugin root or a module directory.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the runtime.
pub type PluginResult<T> = Result<T, PluginError>;

/// Which bulk operation produced a [`BulkFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOperation {
    /// `RuntimeManager::start_all`.
    StartAll,
    /// `RuntimeManager::stop_all`.
    StopAll,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartAll => f.write_str("start"),
            Self::StopAll => f.write_str("stop"),
        }
    }
}

/// One failed module inside a [`BulkFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFailure {
    /// The module that failed.
    pub name: ModuleName,
    /// Why it failed.
    pub cause: String,
}

/// Aggregate error of a best-effort bulk operation.
///
/// Every module was attempted; `failures` lists the ones that did not make
/// it, in the order they were attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// The operation.
    pub operation: BulkOperation,
    /// How many modules were attempted.
    pub attempted: usize,
    /// Every failed module and its cause.
    pub failures: Vec<ModuleFailure>,
}

impl BulkFailure {
    /// Names of the failed modules, in attempt order.
    #[must_use]
    pub fn failed_names(&self) -> Vec<&ModuleName> {
        self.failures.iter().map(|f| &f.name).collect()
    }

    /// Whether `name` is among the failures.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.name.as_str() == name)
    }
}

impl fmt::Display for BulkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to {} {} of {} module(s): ",
            self.operation,
            self.failures.len(),
            self.attempted
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} ({})", failure.name, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for BulkFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_failure_names_every_module() {
        let failure = BulkFailure {
            operation: BulkOperation::StartAll,
            attempted: 3,
            failures: vec![
                ModuleFailure {
                    name: ModuleName::from_static("beta"),
                    cause: "boom".into(),
                },
                ModuleFailure {
                    name: ModuleName::from_static("gamma"),
                    cause: "panicked: oops".into(),
                },
            ],
        };

        let text = failure.to_string();
        assert_eq!(
            text,
            "failed to start 2 of 3 module(s): beta (boom); gamma (panicked: oops)"
        );
        assert!(failure.contains("beta"));
        assert!(!failure.contains("alpha"));
        assert_eq!(failure.failed_names().len(), 2);
    }

    #[test]
    fn lifecycle_error_mentions_stage() {
        let err = PluginError::Lifecycle {
            name: ModuleName::from_static("alpha"),
            stage: LifecycleStage::Stop,
            message: "socket closed".into(),
        };
        assert_eq!(
            err.to_string(),
            "module alpha deactivation failed: socket closed"
        );
    }
}
