//! Filesystem discovery of module candidates.
//!
//! Each immediate subdirectory of the plugin root is one candidate. A valid
//! candidate holds exactly one entry point (a file ending in `.plugin`) next
//! to a `plugin.toml`. Anything else is a structural error for that
//! subdirectory alone; the scan keeps going.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PluginError, PluginResult};

/// Metadata file name inside a module directory.
pub const METADATA_FILE_NAME: &str = "plugin.toml";

/// Extension of a module's entry point file.
pub const ENTRY_EXTENSION: &str = "plugin";

/// A structurally valid module directory. Metadata is not parsed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The module directory.
    pub dir: PathBuf,
    /// Its `plugin.toml`.
    pub metadata_path: PathBuf,
    /// Its single entry point.
    pub entry: PathBuf,
}

impl Candidate {
    /// File stem of the entry point, which selects the module factory.
    #[must_use]
    pub fn entry_id(&self) -> Option<&str> {
        self.entry.file_stem().and_then(|s| s.to_str())
    }
}

/// A directory skipped during a scan, with the reason.
#[derive(Debug)]
pub struct RejectedCandidate {
    /// The skipped directory.
    pub dir: PathBuf,
    /// Why it was skipped.
    pub error: PluginError,
}

/// Result of scanning a plugin root.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Valid candidates, in directory name order.
    pub candidates: Vec<Candidate>,
    /// Directories that were skipped.
    pub rejected: Vec<RejectedCandidate>,
}

/// Scan every immediate subdirectory of `root`.
///
/// Hidden entries (leading `.`) and plain files are ignored. Subdirectories
/// are visited in name order.
///
/// # Errors
///
/// Returns [`PluginError::Io`] if `root` itself cannot be read. Problems with
/// individual subdirectories land in [`ScanOutcome::rejected`].
pub fn scan_root(root: &Path) -> PluginResult<ScanOutcome> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if is_hidden(&entry.file_name()) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    let mut outcome = ScanOutcome::default();
    for dir in dirs {
        match inspect_dir(&dir) {
            Ok(candidate) => {
                debug!(dir = %dir.display(), entry = %candidate.entry.display(), "Found module candidate");
                outcome.candidates.push(candidate);
            },
            Err(error) => {
                warn!(dir = %dir.display(), %error, "Skipping candidate directory");
                outcome.rejected.push(RejectedCandidate { dir, error });
            },
        }
    }

    Ok(outcome)
}

/// Check one directory's structure.
///
/// # Errors
///
/// Returns [`PluginError::DiscoveryStructure`] if the directory cannot be
/// listed, lacks a metadata file, or does not hold exactly one entry point.
pub fn inspect_dir(dir: &Path) -> PluginResult<Candidate> {
    let structure = |reason: String| PluginError::DiscoveryStructure {
        dir: dir.to_path_buf(),
        reason,
    };

    let listing = std::fs::read_dir(dir).map_err(|e| structure(format!("unreadable: {e}")))?;

    let mut entries = Vec::new();
    for entry in listing {
        let path = entry
            .map_err(|e| structure(format!("unreadable entry: {e}")))?
            .path();
        let is_entry = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(ENTRY_EXTENSION));
        if is_entry {
            entries.push(path);
        }
    }
    entries.sort();

    let metadata_path = dir.join(METADATA_FILE_NAME);
    if !metadata_path.is_file() {
        return Err(structure(format!("missing {METADATA_FILE_NAME}")));
    }

    match entries.len() {
        0 => Err(structure(format!(
            "no entry point (*.{ENTRY_EXTENSION}) found"
        ))),
        1 => Ok(Candidate {
            dir: dir.to_path_buf(),
            metadata_path,
            entry: entries.remove(0),
        }),
        n => {
            let names: Vec<String> = entries
                .iter()
                .filter_map(|p| p.file_name())
                .map(|f| f.to_string_lossy().into_owned())
                .collect();
            Err(structure(format!(
                "{n} entry points found, expected exactly one: {}",
                names.join(", ")
            )))
        },
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
