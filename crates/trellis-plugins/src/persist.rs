//! Locked, atomic TOML files for runtime state kept under the plugin root.
//!
//! Each state file `x.toml` is guarded by an advisory `fs2` lock on `x.lk`.
//! Writers replace the file through a synced temp file in the same directory,
//! so readers see either the old or the new contents.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PluginError, PluginResult};

const HEADER: &str = "# Managed by trellis. Do not edit while the host is running.\n\n";

/// Advisory lock held for the lifetime of the value.
struct StateLock {
    _file: Option<File>,
}

impl StateLock {
    /// Lock for reading. Without a lock file no writer ever ran, so there is
    /// nothing to wait for and nothing is created.
    fn shared(state: &Path) -> PluginResult<Self> {
        let lock_path = state.with_extension("lk");
        let file = match File::open(&lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self { _file: None }),
            Err(e) => return Err(state_error(state, "open lock", &e)),
        };
        file.lock_shared()
            .map_err(|e| state_error(state, "lock (shared)", &e))?;
        Ok(Self { _file: Some(file) })
    }

    /// Lock for writing, creating the lock file and its directory.
    fn exclusive(state: &Path) -> PluginResult<Self> {
        let lock_path = state.with_extension("lk");
        if let Some(dir) = lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| state_error(state, "create directory", &e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| state_error(state, "open lock", &e))?;
        file.lock_exclusive()
            .map_err(|e| state_error(state, "lock (exclusive)", &e))?;
        Ok(Self { _file: Some(file) })
    }
}

fn state_error(path: &Path, action: &str, cause: &dyn std::fmt::Display) -> PluginError {
    PluginError::Preferences {
        path: path.to_path_buf(),
        message: format!("{action} failed: {cause}"),
    }
}

/// Parse the file, or `None` when it does not exist. Caller holds the lock.
fn read_state<T: DeserializeOwned>(path: &Path) -> PluginResult<Option<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(state_error(path, "read", &e)),
    };
    toml::from_str(&text)
        .map(Some)
        .map_err(|e| state_error(path, "parse", &e))
}

/// Read `path` as TOML, or `T::default()` if it does not exist.
pub(crate) fn load_or_default<T>(path: &Path) -> PluginResult<T>
where
    T: DeserializeOwned + Default,
{
    let _lock = StateLock::shared(path)?;
    Ok(read_state(path)?.unwrap_or_default())
}

/// Load, mutate and save `path` under one exclusive lock.
pub(crate) fn update<T, F, R>(path: &Path, f: F) -> PluginResult<R>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T) -> R,
{
    let _lock = StateLock::exclusive(path)?;
    let mut state: T = read_state(path)?.unwrap_or_default();
    let result = f(&mut state);
    replace(path, &state)?;
    Ok(result)
}

fn replace<T: Serialize>(path: &Path, state: &T) -> PluginResult<()> {
    let body = toml::to_string_pretty(state).map_err(|e| state_error(path, "serialize", &e))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| state_error(path, "create temp file", &e))?;
    tmp.write_all(HEADER.as_bytes())
        .and_then(|()| tmp.write_all(body.as_bytes()))
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| state_error(path, "write temp file", &e))?;
    tmp.persist(path)
        .map_err(|e| state_error(path, "replace", &e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn missing_file_loads_default_without_creating_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        let value: Counter = load_or_default(&path).unwrap();
        assert_eq!(value, Counter::default());
        assert!(!path.with_extension("lk").exists());
    }

    #[test]
    fn update_persists_and_returns_closure_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");

        let previous = update(&path, |c: &mut Counter| std::mem::replace(&mut c.hits, 7)).unwrap();

        assert_eq!(previous, 0);
        let value: Counter = load_or_default(&path).unwrap();
        assert_eq!(value.hits, 7);
        assert!(path.with_extension("lk").exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Managed by trellis."));
    }

    #[test]
    fn corrupt_file_is_a_preferences_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");
        std::fs::write(&path, "hits = [").unwrap();

        let err = load_or_default::<Counter>(&path).unwrap_err();
        assert!(matches!(
            err,
            PluginError::Preferences { ref message, .. } if message.starts_with("parse failed")
        ));
    }
}
