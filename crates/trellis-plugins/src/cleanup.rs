//! Deferred filesystem removals.
//!
//! When a module directory cannot be deleted right away (a file is still
//! open, a permission glitch), the removal is recorded in
//! `<root>/.cleanup.toml` and retried on the next discovery pass.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PluginResult;
use crate::persist;

/// Queue file name under the plugin root.
pub const CLEANUP_FILE_NAME: &str = ".cleanup.toml";

/// What a task removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupKind {
    /// A single file.
    File,
    /// A directory and everything under it.
    Dir,
}

/// One pending removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTask {
    /// File or directory.
    pub kind: CleanupKind,
    /// Path to remove.
    pub path: PathBuf,
}

impl CleanupTask {
    /// Remove a directory tree.
    #[must_use]
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: CleanupKind::Dir,
            path: path.into(),
        }
    }

    /// Remove a single file.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: CleanupKind::File,
            path: path.into(),
        }
    }

    fn execute(&self) -> std::io::Result<()> {
        let result = match self.kind {
            CleanupKind::File => std::fs::remove_file(&self.path),
            CleanupKind::Dir => std::fs::remove_dir_all(&self.path),
        };
        match result {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    #[serde(default, rename = "task")]
    tasks: Vec<CleanupTask>,
}

/// Persisted queue of pending removals.
#[derive(Debug, Clone)]
pub struct CleanupQueue {
    path: PathBuf,
}

impl CleanupQueue {
    /// Queue stored at `<root>/.cleanup.toml`.
    #[must_use]
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: root.join(CLEANUP_FILE_NAME),
        }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pending tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Preferences`](crate::PluginError::Preferences)
    /// if the queue file cannot be read.
    pub fn pending(&self) -> PluginResult<Vec<CleanupTask>> {
        let file: QueueFile = persist::load_or_default(&self.path)?;
        Ok(file.tasks)
    }

    /// Add a task unless an identical one is already queued.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Preferences`](crate::PluginError::Preferences)
    /// if the queue file cannot be written.
    pub fn enqueue(&self, task: CleanupTask) -> PluginResult<()> {
        persist::update(&self.path, |file: &mut QueueFile| {
            if !file.tasks.contains(&task) {
                debug!(path = %task.path.display(), kind = ?task.kind, "Queued cleanup task");
                file.tasks.push(task);
            }
        })
    }

    /// Drop every task targeting `path`. Returns whether any was dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Preferences`](crate::PluginError::Preferences)
    /// if the queue file cannot be written.
    pub fn cancel(&self, path: &Path) -> PluginResult<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        persist::update(&self.path, |file: &mut QueueFile| {
            let before = file.tasks.len();
            file.tasks.retain(|t| t.path != path);
            file.tasks.len() != before
        })
    }

    /// Run every pending task. Failed tasks stay queued. Returns how many
    /// completed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Preferences`](crate::PluginError::Preferences)
    /// if the queue file cannot be read or written.
    pub fn execute_all(&self) -> PluginResult<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        persist::update(&self.path, |file: &mut QueueFile| {
            let before = file.tasks.len();
            file.tasks.retain(|task| match task.execute() {
                Ok(()) => {
                    info!(path = %task.path.display(), "Completed deferred cleanup");
                    false
                },
                Err(e) => {
                    warn!(path = %task.path.display(), error = %e, "Deferred cleanup failed, keeping task");
                    true
                },
            });
            before.saturating_sub(file.tasks.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executes_and_clears_tasks() {
        let root = tempfile::tempdir().unwrap();
        let stale_dir = root.path().join("old-module");
        std::fs::create_dir_all(stale_dir.join("lib")).unwrap();
        let stale_file = root.path().join("leftover.bin");
        std::fs::write(&stale_file, b"x").unwrap();

        let queue = CleanupQueue::for_root(root.path());
        queue.enqueue(CleanupTask::dir(&stale_dir)).unwrap();
        queue.enqueue(CleanupTask::file(&stale_file)).unwrap();
        queue.enqueue(CleanupTask::dir(&stale_dir)).unwrap();
        assert_eq!(queue.pending().unwrap().len(), 2);

        assert_eq!(queue.execute_all().unwrap(), 2);
        assert!(!stale_dir.exists());
        assert!(!stale_file.exists());
        assert!(queue.pending().unwrap().is_empty());
    }

    #[test]
    fn already_removed_targets_count_as_done() {
        let root = tempfile::tempdir().unwrap();
        let queue = CleanupQueue::for_root(root.path());
        queue.enqueue(CleanupTask::dir(root.path().join("gone"))).unwrap();
        assert_eq!(queue.execute_all().unwrap(), 1);
    }

    #[test]
    fn failing_tasks_are_kept() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("not-a-file");
        std::fs::create_dir(&dir).unwrap();

        let queue = CleanupQueue::for_root(root.path());
        queue.enqueue(CleanupTask::file(&dir)).unwrap();

        assert_eq!(queue.execute_all().unwrap(), 0);
        assert_eq!(queue.pending().unwrap(), vec![CleanupTask::file(&dir)]);
    }

    #[test]
    fn cancel_removes_matching_tasks() {
        let root = tempfile::tempdir().unwrap();
        let queue = CleanupQueue::for_root(root.path());
        let target = root.path().join("alpha");

        assert!(!queue.cancel(&target).unwrap());
        queue.enqueue(CleanupTask::dir(&target)).unwrap();
        assert!(queue.cancel(&target).unwrap());
        assert!(queue.pending().unwrap().is_empty());
    }

    #[test]
    fn queue_file_is_hidden_toml() {
        let root = tempfile::tempdir().unwrap();
        let queue = CleanupQueue::for_root(root.path());
        queue.enqueue(CleanupTask::dir(root.path().join("x"))).unwrap();

        let text = std::fs::read_to_string(queue.path()).unwrap();
        assert!(text.contains("[[task]]"));
        assert!(text.contains("kind = \"dir\""));
    }
}
