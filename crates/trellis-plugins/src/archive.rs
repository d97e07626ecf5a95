//! Safe extraction of packaged modules (`.tar.gz` / `.tgz`).
//!
//! Nothing outside the destination is ever written. Absolute paths, `..`
//! components, links, device nodes and FIFOs are refused. Extraction stops
//! once the entry count or the declared decompressed size passes
//! [`ExtractLimits`].

use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// Caps applied while extracting one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Most entries (of any type) the archive may hold.
    pub max_entries: usize,
    /// Most bytes the entries may declare in total.
    pub max_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 200_000_000,
        }
    }
}

/// What to do with one archive entry.
enum Disposition {
    /// Write it under the destination at this relative path.
    Unpack(PathBuf),
    /// PAX / GNU bookkeeping headers; nothing to write.
    Skip,
}

/// Whether `path` names a supported archive.
#[must_use]
pub fn is_archive(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_ascii_lowercase();
    name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

/// Extract with the default [`ExtractLimits`].
///
/// # Errors
///
/// See [`extract_archive_with`].
pub fn extract_archive(archive: &Path, dest: &Path) -> PluginResult<PathBuf> {
    extract_archive_with(archive, dest, ExtractLimits::default())
}

/// Extract `archive` into the existing directory `dest` and return the
/// module root: the single top-level directory when the archive wraps
/// everything in one (`hello-1.0.0/plugin.toml`), `dest` otherwise.
///
/// # Errors
///
/// - [`PluginError::PathTraversal`] for an escaping entry path
/// - [`PluginError::UnsafeEntryType`] for links and special files
/// - [`PluginError::Extraction`] for unreadable or empty archives and
///   exceeded limits
pub fn extract_archive_with(
    archive: &Path,
    dest: &Path,
    limits: ExtractLimits,
) -> PluginResult<PathBuf> {
    let file = File::open(archive).map_err(|e| {
        extraction_error(format!("cannot open {}: {e}", archive.display()))
    })?;
    let dest = dest
        .canonicalize()
        .map_err(|e| extraction_error(format!("bad destination {}: {e}", dest.display())))?;

    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = tar
        .entries()
        .map_err(|e| extraction_error(format!("unreadable archive: {e}")))?;

    let mut seen = 0usize;
    let mut declared = 0u64;
    for entry in entries {
        let mut entry = entry.map_err(|e| extraction_error(format!("corrupt entry: {e}")))?;

        seen = seen.saturating_add(1);
        if seen > limits.max_entries {
            return Err(extraction_error(format!(
                "more than {} entries",
                limits.max_entries
            )));
        }
        declared = declared.saturating_add(entry.header().size().unwrap_or(0));
        if declared > limits.max_bytes {
            return Err(extraction_error(format!(
                "more than {} bytes once extracted",
                limits.max_bytes
            )));
        }

        let Disposition::Unpack(relative) = classify(&entry)? else {
            continue;
        };
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target).map_err(|e| {
            extraction_error(format!("cannot write {}: {e}", relative.display()))
        })?;
    }

    if seen == 0 {
        return Err(extraction_error("archive is empty".to_owned()));
    }
    debug!(archive = %archive.display(), entries = seen, bytes = declared, "Archive extracted");

    Ok(single_top_level_dir(&dest)?.unwrap_or(dest))
}

fn extraction_error(message: String) -> PluginError {
    PluginError::Extraction { message }
}

/// Decide whether an entry may be written, and where.
fn classify<R: std::io::Read>(entry: &tar::Entry<'_, R>) -> PluginResult<Disposition> {
    let kind = entry.header().entry_type();
    let path = entry
        .path()
        .map_err(|e| extraction_error(format!("undecodable entry path: {e}")))?
        .into_owned();

    match kind {
        EntryType::Regular | EntryType::Directory => {
            ensure_contained(&path)?;
            Ok(Disposition::Unpack(path))
        },
        EntryType::XHeader | EntryType::XGlobalHeader | EntryType::GNULongName => {
            Ok(Disposition::Skip)
        },
        other => Err(PluginError::UnsafeEntryType {
            entry_type: format!("{other:?}"),
            path: path.display().to_string(),
        }),
    }
}

/// Reject paths that are absolute or step outside the destination.
fn ensure_contained(path: &Path) -> PluginResult<()> {
    let contained = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if contained {
        Ok(())
    } else {
        Err(PluginError::PathTraversal {
            path: path.display().to_string(),
        })
    }
}

/// The only child of `dir`, if it has exactly one and it is a directory.
fn single_top_level_dir(dir: &Path) -> PluginResult<Option<PathBuf>> {
    let mut children = std::fs::read_dir(dir)?;
    let (Some(first), None) = (children.next(), children.next()) else {
        return Ok(None);
    };
    let only = first?.path();
    Ok(only.is_dir().then_some(only))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tar::{Builder, Header};

    use super::*;

    enum Item<'a> {
        File(&'a str, &'a [u8]),
        /// Path written into the raw header, skipping the builder's checks.
        RawFile(&'a [u8]),
        Symlink(&'a str, &'a str),
    }

    fn tarball(path: &Path, items: &[Item<'_>]) {
        let mut builder = Builder::new(Vec::new());
        for item in items {
            let mut header = Header::new_gnu();
            match *item {
                Item::File(name, data) => {
                    header.set_path(name).unwrap();
                    header.set_size(data.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append(&header, data).unwrap();
                },
                Item::RawFile(name) => {
                    header.as_old_mut().name[..name.len()].copy_from_slice(name);
                    header.set_entry_type(EntryType::Regular);
                    header.set_size(0);
                    header.set_mode(0o644);
                    header.set_cksum();
                    builder.append(&header, std::io::empty()).unwrap();
                },
                Item::Symlink(name, target) => {
                    header.set_path(name).unwrap();
                    header.set_entry_type(EntryType::Symlink);
                    header.set_link_name(target).unwrap();
                    header.set_size(0);
                    header.set_cksum();
                    builder.append(&header, std::io::empty()).unwrap();
                },
            }
        }
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        gz.write_all(&builder.into_inner().unwrap()).unwrap();
        std::fs::write(path, gz.finish().unwrap()).unwrap();
    }

    fn out_dir(tmp: &tempfile::TempDir) -> PathBuf {
        let dest = tmp.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        dest
    }

    #[test]
    fn recognizes_archive_names() {
        assert!(is_archive(Path::new("hello.tar.gz")));
        assert!(is_archive(Path::new("dist/HELLO.TGZ")));
        assert!(!is_archive(Path::new("hello.zip")));
        assert!(!is_archive(Path::new("tar.gz/")));
    }

    #[test]
    fn wrapped_archive_returns_inner_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("hello.tgz");
        tarball(
            &archive,
            &[
                Item::File("hello-1.0.0/plugin.toml", b"name = \"hello\""),
                Item::File("hello-1.0.0/hello.plugin", b"entry"),
            ],
        );

        let root = extract_archive(&archive, &out_dir(&tmp)).unwrap();
        assert!(root.ends_with("hello-1.0.0"));
        assert!(root.join("hello.plugin").is_file());
    }

    #[test]
    fn flat_archive_returns_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("flat.tar.gz");
        tarball(
            &archive,
            &[
                Item::File("plugin.toml", b"name = \"flat\""),
                Item::File("flat.plugin", b"entry"),
            ],
        );
        let dest = out_dir(&tmp);

        let root = extract_archive(&archive, &dest).unwrap();
        assert_eq!(root, dest.canonicalize().unwrap());
    }

    #[test]
    fn parent_components_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("evil.tgz");
        tarball(&archive, &[Item::RawFile(b"../escape.txt")]);

        let err = extract_archive(&archive, &out_dir(&tmp)).unwrap_err();
        assert!(matches!(err, PluginError::PathTraversal { .. }));
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn absolute_paths_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("abs.tgz");
        tarball(&archive, &[Item::RawFile(b"/tmp/trellis-abs.txt")]);

        let err = extract_archive(&archive, &out_dir(&tmp)).unwrap_err();
        assert!(matches!(err, PluginError::PathTraversal { .. }));
    }

    #[test]
    fn links_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("link.tgz");
        tarball(
            &archive,
            &[
                Item::File("mod/plugin.toml", b""),
                Item::Symlink("mod/secrets", "plugin.toml"),
            ],
        );

        let err = extract_archive(&archive, &out_dir(&tmp)).unwrap_err();
        assert!(matches!(
            err,
            PluginError::UnsafeEntryType { ref path, .. } if path == "mod/secrets"
        ));
    }

    #[test]
    fn limits_stop_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("big.tgz");
        tarball(
            &archive,
            &[
                Item::File("a.txt", b"0123456789"),
                Item::File("b.txt", b"0123456789"),
                Item::File("c.txt", b"0123456789"),
            ],
        );

        let few = ExtractLimits {
            max_entries: 2,
            ..ExtractLimits::default()
        };
        let err = extract_archive_with(&archive, &out_dir(&tmp), few).unwrap_err();
        assert!(err.to_string().contains("more than 2 entries"));

        let small = ExtractLimits {
            max_bytes: 15,
            ..ExtractLimits::default()
        };
        let dest = tmp.path().join("out-small");
        std::fs::create_dir(&dest).unwrap();
        let err = extract_archive_with(&archive, &dest, small).unwrap_err();
        assert!(matches!(err, PluginError::Extraction { .. }));
    }

    #[test]
    fn garbage_is_an_extraction_error() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("junk.tgz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let err = extract_archive(&archive, &out_dir(&tmp)).unwrap_err();
        assert!(matches!(err, PluginError::Extraction { .. }));
    }
}
