//! Loading a module behind its boundary.
//!
//! Trellis does not load native code: the host registers a factory per entry
//! point id, and the `.plugin` file in the module directory selects which one
//! builds the module. Each loaded module gets its own [`LoadBoundary`]
//! (directory, private library directory, resolved artifacts and entry
//! digest). Isolation stops there: a module shares the host's address space,
//! so a module's background work can still affect the host.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::artifact;
use crate::discovery::Candidate;
use crate::error::{PluginError, PluginResult};
use crate::metadata::Metadata;
use crate::module::Module;

/// Per-module directory for resolved artifacts.
pub const LIB_DIR_NAME: &str = "lib";

/// Per-module directory for the module's own settings.
pub const CONFIG_DIR_NAME: &str = "config";

/// Turns a candidate into a module instance.
pub trait ModuleLoader: Send + Sync {
    /// Build the module for `candidate`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoadFailed`] if the entry point cannot be
    /// turned into a module.
    fn load(&self, candidate: &Candidate, metadata: &Metadata) -> PluginResult<Box<dyn Module>>;
}

/// Builds a module from its validated metadata.
pub type ModuleFactory = Box<dyn Fn(&Metadata) -> anyhow::Result<Box<dyn Module>> + Send + Sync>;

/// Loader backed by host-registered factories, keyed by entry point id (the
/// `.plugin` file stem).
#[derive(Default)]
pub struct FactoryLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl FactoryLoader {
    /// Create a loader with no factories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `entry_id`, replacing any previous one.
    pub fn register<F>(&mut self, entry_id: impl Into<String>, factory: F)
    where
        F: Fn(&Metadata) -> anyhow::Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.factories.insert(entry_id.into(), Box::new(factory));
    }

    /// Builder form of [`FactoryLoader::register`].
    #[must_use]
    pub fn with<F>(mut self, entry_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Metadata) -> anyhow::Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.register(entry_id, factory);
        self
    }

    /// Whether a factory is registered for `entry_id`.
    #[must_use]
    pub fn contains(&self, entry_id: &str) -> bool {
        self.factories.contains_key(entry_id)
    }
}

impl fmt::Debug for FactoryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("FactoryLoader")
            .field("entry_ids", &ids)
            .finish()
    }
}

impl ModuleLoader for FactoryLoader {
    fn load(&self, candidate: &Candidate, metadata: &Metadata) -> PluginResult<Box<dyn Module>> {
        let failed = |message: String| PluginError::LoadFailed {
            name: metadata.name.clone(),
            message,
        };

        let entry_id = candidate
            .entry_id()
            .ok_or_else(|| failed(format!("entry point {} has no usable name", candidate.entry.display())))?;
        let factory = self
            .factories
            .get(entry_id)
            .ok_or_else(|| failed(format!("no factory registered for entry point '{entry_id}'")))?;

        debug!(module = %metadata.name, entry = entry_id, "Loading module");
        match catch_unwind(AssertUnwindSafe(|| factory(metadata))) {
            Ok(Ok(module)) => Ok(module),
            Ok(Err(e)) => Err(failed(format!("{e:#}"))),
            Err(payload) => Err(failed(format!("panicked: {}", panic_message(&*payload)))),
        }
    }
}

/// Resources owned by one loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBoundary {
    /// The module directory.
    pub module_dir: PathBuf,
    /// The entry point file.
    pub entry: PathBuf,
    /// `blake3:<hex>` digest of the entry point at load time.
    pub entry_digest: String,
    /// Private library directory.
    pub lib_dir: PathBuf,
    /// Artifacts resolved into `lib_dir`.
    pub artifacts: Vec<PathBuf>,
}

impl LoadBoundary {
    /// Record the boundary for a freshly loaded candidate.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the entry point cannot be read.
    pub fn for_candidate(candidate: &Candidate) -> PluginResult<Self> {
        let bytes = std::fs::read(&candidate.entry)?;
        Ok(Self {
            module_dir: candidate.dir.clone(),
            entry: candidate.entry.clone(),
            entry_digest: artifact::digest(&bytes),
            lib_dir: candidate.dir.join(LIB_DIR_NAME),
            artifacts: Vec::new(),
        })
    }

    /// The module's settings directory.
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.module_dir.join(CONFIG_DIR_NAME)
    }

    /// Whether `path` lies inside the module directory.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.module_dir)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::module::ModuleContext;

    struct Noop;

    #[async_trait]
    impl Module for Noop {
        async fn start(&mut self, _ctx: &ModuleContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn candidate(root: &Path, entry: &str) -> Candidate {
        let dir = root.join("alpha");
        std::fs::create_dir_all(&dir).unwrap();
        let entry = dir.join(entry);
        std::fs::write(&entry, b"alpha entry").unwrap();
        Candidate {
            metadata_path: dir.join("plugin.toml"),
            dir,
            entry,
        }
    }

    fn metadata() -> Metadata {
        Metadata::parse(
            "name = \"alpha\"\nversion = \"1.0.0\"\nhost-version = \"0.1.0\"",
            Path::new("plugin.toml"),
        )
        .unwrap()
    }

    #[test]
    fn loads_registered_entry() {
        let root = tempfile::tempdir().unwrap();
        let loader = FactoryLoader::new().with("alpha", |_| Ok(Box::new(Noop) as Box<dyn Module>));
        assert!(loader.contains("alpha"));
        assert!(loader.load(&candidate(root.path(), "alpha.plugin"), &metadata()).is_ok());
    }

    #[test]
    fn unknown_entry_fails_to_load() {
        let root = tempfile::tempdir().unwrap();
        let loader = FactoryLoader::new();
        let err = loader
            .load(&candidate(root.path(), "other.plugin"), &metadata())
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::LoadFailed { .. }));
        assert!(err.to_string().contains("'other'"));
    }

    #[test]
    fn factory_errors_and_panics_become_load_failures() {
        let root = tempfile::tempdir().unwrap();
        let loader = FactoryLoader::new()
            .with("alpha", |_| Err(anyhow::anyhow!("missing codec")))
            .with("beta", |_| panic!("factory exploded"));

        let err = loader
            .load(&candidate(root.path(), "alpha.plugin"), &metadata())
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing codec"));

        let err = loader
            .load(&candidate(root.path(), "beta.plugin"), &metadata())
            .err()
            .unwrap();
        assert!(err.to_string().contains("panicked: factory exploded"));
    }

    #[test]
    fn boundary_records_entry_digest() {
        let root = tempfile::tempdir().unwrap();
        let c = candidate(root.path(), "alpha.plugin");
        let boundary = LoadBoundary::for_candidate(&c).unwrap();

        assert_eq!(boundary.entry_digest, artifact::digest(b"alpha entry"));
        assert!(boundary.contains(&boundary.lib_dir));
        assert!(boundary.config_dir().ends_with(CONFIG_DIR_NAME));
    }
}
