//! The persisted set of disabled modules.
//!
//! A disabled module is still discovered and listed, but it never starts and
//! contributes nothing to the dependency graph.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PluginResult;
use crate::metadata::ModuleName;
use crate::persist;

/// Storage for the disabled-module set.
pub trait DisabledStore: Send + Sync {
    /// Current disabled set.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Preferences`](crate::PluginError::Preferences)
    /// if the backing store cannot be read.
    fn load(&self) -> PluginResult<BTreeSet<ModuleName>>;

    /// Mark `name` disabled or enabled. Returns whether the set changed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Preferences`](crate::PluginError::Preferences)
    /// if the backing store cannot be written.
    fn set_disabled(&self, name: &ModuleName, disabled: bool) -> PluginResult<bool>;

    /// Whether `name` is disabled.
    ///
    /// # Errors
    ///
    /// See [`DisabledStore::load`].
    fn is_disabled(&self, name: &ModuleName) -> PluginResult<bool> {
        Ok(self.load()?.contains(name))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DisabledFile {
    #[serde(default)]
    disabled: BTreeSet<ModuleName>,
}

/// Disabled set kept in a TOML file:
///
/// ```toml
/// disabled = ["legacy-tools", "experiments"]
/// ```
#[derive(Debug, Clone)]
pub struct FileDisabledStore {
    path: PathBuf,
}

impl FileDisabledStore {
    /// Use the file at `path`. It is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DisabledStore for FileDisabledStore {
    fn load(&self) -> PluginResult<BTreeSet<ModuleName>> {
        let file: DisabledFile = persist::load_or_default(&self.path)?;
        Ok(file.disabled)
    }

    fn set_disabled(&self, name: &ModuleName, disabled: bool) -> PluginResult<bool> {
        let changed = persist::update(&self.path, |file: &mut DisabledFile| {
            if disabled {
                file.disabled.insert(name.clone())
            } else {
                file.disabled.remove(name)
            }
        })?;
        debug!(module = %name, disabled, changed, path = %self.path.display(), "Updated disabled set");
        Ok(changed)
    }
}

/// In-memory disabled set, for embedding hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryDisabledStore {
    disabled: Mutex<BTreeSet<ModuleName>>,
}

impl MemoryDisabledStore {
    /// Create a store with an initial disabled set.
    #[must_use]
    pub fn new(disabled: impl IntoIterator<Item = ModuleName>) -> Self {
        Self {
            disabled: Mutex::new(disabled.into_iter().collect()),
        }
    }
}

impl DisabledStore for MemoryDisabledStore {
    fn load(&self) -> PluginResult<BTreeSet<ModuleName>> {
        Ok(self
            .disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set_disabled(&self, name: &ModuleName, disabled: bool) -> PluginResult<bool> {
        let mut set = self.disabled.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(if disabled {
            set.insert(name.clone())
        } else {
            set.remove(name)
        })
    }
}
