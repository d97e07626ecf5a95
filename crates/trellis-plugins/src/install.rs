//! Materializing a module package under the plugin root.
//!
//! A package is either a module directory or a `.tar.gz`/`.tgz` archive of
//! one. It is copied into a hidden staging directory first and renamed into
//! place, so a half-copied module is never visible to discovery.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::archive;
use crate::error::{PluginError, PluginResult};
use crate::metadata::ModuleName;

/// Prefix of staging directories under the plugin root.
pub const STAGING_PREFIX: &str = ".staging-";

/// Resolve an install source to a module directory on disk, extracting
/// archives into `scratch`.
///
/// # Errors
///
/// Returns [`PluginError::UnsupportedPackage`] if `source` is neither a
/// directory nor an archive, or any extraction error.
pub fn unpack_source(source: &Path, scratch: &Path) -> PluginResult<PathBuf> {
    if source.is_dir() {
        return Ok(source.to_path_buf());
    }
    if source.is_file() && archive::is_archive(source) {
        return archive::extract_archive(source, scratch);
    }
    Err(PluginError::UnsupportedPackage {
        path: source.to_path_buf(),
    })
}

/// Copy `source` to `<root>/<name>` through a staging directory.
///
/// # Errors
///
/// Returns [`PluginError::Io`] if copying or the final rename fails. The
/// staging directory is removed on failure.
pub fn commit(source: &Path, root: &Path, name: &ModuleName) -> PluginResult<PathBuf> {
    let staging = root.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4()));
    let target = root.join(name.as_str());

    let result = copy_tree(source, &staging).and_then(|()| {
        std::fs::rename(&staging, &target)?;
        Ok(())
    });

    if let Err(e) = result {
        if let Err(cleanup) = std::fs::remove_dir_all(&staging)
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            warn!(staging = %staging.display(), error = %cleanup, "Failed to remove staging directory");
        }
        return Err(e);
    }

    debug!(module = %name, dir = %target.display(), "Committed module directory");
    Ok(target)
}

/// Recursively copy regular files and directories. Symlinks are skipped.
fn copy_tree(source: &Path, dest: &Path) -> PluginResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            PluginError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("directory walk failed")
            }))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| PluginError::Io(std::io::Error::other(e)))?;
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        } else {
            warn!(path = %entry.path().display(), "Skipping non-regular file in module package");
        }
    }
    Ok(())
}

/// Remove leftover staging directories from an interrupted install.
pub(crate) fn sweep_staging(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let is_staging = entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX);
        if is_staging && entry.path().is_dir() {
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => debug!(dir = %entry.path().display(), "Removed stale staging directory"),
                Err(e) => warn!(dir = %entry.path().display(), error = %e, "Failed to remove stale staging directory"),
            }
        }
    }
}
