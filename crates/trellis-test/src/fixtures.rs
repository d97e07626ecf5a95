//! On-disk fixtures: module directories, archives and plugin roots.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use semver::Version;
use tempfile::TempDir;
use trellis_plugins::{
    MemoryDisabledStore, ModuleLoader, ModuleName, RuntimeManager, RuntimeOptions,
};

/// Host version used by [`test_runtime`].
#[must_use]
pub fn test_host_version() -> Version {
    Version::new(1, 0, 0)
}

/// A runtime over `root` at [`test_host_version`] with an in-memory
/// disabled set.
#[must_use]
pub fn test_runtime(root: &Path, loader: Arc<dyn ModuleLoader>) -> RuntimeManager {
    test_runtime_with_disabled(root, loader, Vec::new())
}

/// Like [`test_runtime`], with `disabled` modules pre-disabled.
#[must_use]
pub fn test_runtime_with_disabled(
    root: &Path,
    loader: Arc<dyn ModuleLoader>,
    disabled: impl IntoIterator<Item = &'static str>,
) -> RuntimeManager {
    let store = MemoryDisabledStore::new(disabled.into_iter().map(ModuleName::from_static));
    RuntimeManager::with_disabled_store(
        RuntimeOptions::new(root, test_host_version()),
        loader,
        Box::new(store),
    )
}

/// Install a test subscriber once per process. `RUST_LOG` applies.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A temporary plugin root, removed on drop.
#[derive(Debug)]
pub struct PluginRoot {
    dir: TempDir,
}

impl PluginRoot {
    /// Create an empty root.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create plugin root"),
        }
    }

    /// The root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `fixture` under the root, in a directory named after the module.
    #[must_use = "the module directory is usually asserted on"]
    pub fn add(&self, fixture: &ModuleFixture) -> PathBuf {
        fixture.write_to(self.path())
    }
}

impl Default for PluginRoot {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a module directory on disk.
///
/// By default it writes a `plugin.toml` for version `1.0.0` requiring host
/// `1.0.0`, and one entry point named after the module.
#[derive(Debug, Clone)]
pub struct ModuleFixture {
    name: String,
    dir_name: Option<String>,
    version: String,
    host_version: Option<String>,
    author: Option<String>,
    description: Option<String>,
    icon: Option<String>,
    entries: Vec<String>,
    extra_metadata: Vec<String>,
    files: Vec<(PathBuf, Vec<u8>)>,
    write_metadata: bool,
}

impl ModuleFixture {
    /// A fixture for module `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            entries: vec![name.clone()],
            name,
            dir_name: None,
            version: "1.0.0".into(),
            host_version: Some("1.0.0".into()),
            author: None,
            description: None,
            icon: None,
            extra_metadata: Vec::new(),
            files: Vec::new(),
            write_metadata: true,
        }
    }

    /// Module name in `plugin.toml`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Use a directory name other than the module name.
    #[must_use]
    pub fn dir_name(mut self, dir: impl Into<String>) -> Self {
        self.dir_name = Some(dir.into());
        self
    }

    /// Module version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Minimum host version. `None` omits the field.
    #[must_use]
    pub fn host_version(mut self, version: Option<&str>) -> Self {
        self.host_version = version.map(str::to_owned);
        self
    }

    /// Author field.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Description field.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Icon path relative to the module directory.
    #[must_use]
    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Replace the entry points with a single one.
    #[must_use]
    pub fn entry(mut self, entry_id: impl Into<String>) -> Self {
        self.entries = vec![entry_id.into()];
        self
    }

    /// Add another entry point.
    #[must_use]
    pub fn extra_entry(mut self, entry_id: impl Into<String>) -> Self {
        self.entries.push(entry_id.into());
        self
    }

    /// Write no entry point at all.
    #[must_use]
    pub fn without_entry(mut self) -> Self {
        self.entries.clear();
        self
    }

    /// Write no `plugin.toml`.
    #[must_use]
    pub fn without_metadata(mut self) -> Self {
        self.write_metadata = false;
        self
    }

    /// Append a raw line to `plugin.toml`.
    #[must_use]
    pub fn metadata_line(mut self, line: impl Into<String>) -> Self {
        self.extra_metadata.push(line.into());
        self
    }

    /// Add an arbitrary file relative to the module directory.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }

    /// The `plugin.toml` contents.
    #[must_use]
    pub fn metadata_toml(&self) -> String {
        let mut out = format!("name = \"{}\"\nversion = \"{}\"\n", self.name, self.version);
        let optional = [
            ("host-version", &self.host_version),
            ("author", &self.author),
            ("description", &self.description),
            ("icon", &self.icon),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                out.push_str(&format!("{key} = \"{value}\"\n"));
            }
        }
        for line in &self.extra_metadata {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Write the module into `<parent>/<dir name>` and return that path.
    ///
    /// # Panics
    ///
    /// Panics on any I/O error.
    #[must_use = "the module directory is usually asserted on"]
    pub fn write_to(&self, parent: &Path) -> PathBuf {
        let dir = parent.join(self.dir_name.as_deref().unwrap_or(&self.name));
        self.write_into(&dir);
        dir
    }

    /// Write the module contents directly into `dir`.
    ///
    /// # Panics
    ///
    /// Panics on any I/O error.
    #[allow(clippy::expect_used)]
    pub fn write_into(&self, dir: &Path) {
        std::fs::create_dir_all(dir).expect("failed to create module dir");
        if self.write_metadata {
            std::fs::write(dir.join("plugin.toml"), self.metadata_toml())
                .expect("failed to write plugin.toml");
        }
        for entry in &self.entries {
            std::fs::write(dir.join(format!("{entry}.plugin")), entry.as_bytes())
                .expect("failed to write entry point");
        }
        for (path, contents) in &self.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).expect("failed to create fixture dir");
            }
            std::fs::write(&target, contents).expect("failed to write fixture file");
        }
    }

    /// Pack the module into a `.tar.gz` at `archive`, wrapped in one
    /// top-level directory the way release tarballs are.
    ///
    /// # Panics
    ///
    /// Panics on any I/O error.
    #[allow(clippy::expect_used)]
    pub fn pack(&self, archive: &Path) -> PathBuf {
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        let wrapper = format!("{}-{}", self.name, self.version);
        self.write_into(&scratch.path().join(&wrapper));

        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_dir_all(&wrapper, scratch.path().join(&wrapper))
            .expect("failed to build tarball");
        let tar_data = builder.into_inner().expect("failed to finish tarball");

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&tar_data).expect("failed to compress tarball");
        std::fs::write(archive, encoder.finish().expect("failed to finish gzip"))
            .expect("failed to write archive");
        archive.to_path_buf()
    }
}
