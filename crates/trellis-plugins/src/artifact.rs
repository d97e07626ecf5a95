//! Extra runtime libraries a module needs beyond its entry point.
//!
//! Resolution happens once per module, right after loading. Any failure is
//! local to that module: it is marked failed and discovery moves on.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Why a module's artifacts could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// A declared artifact does not exist at its source.
    #[error("artifact {name} not found at {}", path.display())]
    Missing {
        /// Declared artifact file name.
        name: String,
        /// Where it was expected.
        path: PathBuf,
    },

    /// The artifact's content does not match its declared digest.
    #[error("artifact {name} digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Declared artifact file name.
        name: String,
        /// Declared digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },

    /// Filesystem failure while resolving.
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves a module's extra dependencies into its library directory.
pub trait ArtifactRepository: Send + Sync {
    /// Make every artifact available under `lib_dir` and return their paths.
    ///
    /// # Errors
    ///
    /// Returns an [`ArtifactError`] if any artifact cannot be resolved.
    fn resolve(&self, lib_dir: &Path) -> Result<Vec<PathBuf>, ArtifactError>;
}

/// One declared artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSpec {
    /// File name in both the source and the library directory.
    pub file_name: String,
    /// Expected `blake3:<hex>` digest, if pinned.
    pub blake3: Option<String>,
}

impl ArtifactSpec {
    /// An unpinned artifact.
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            blake3: None,
        }
    }

    /// Pin the artifact to a `blake3:<hex>` digest.
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.blake3 = Some(digest.into());
        self
    }
}

/// Copies artifacts from a local directory, verifying pinned digests.
#[derive(Debug, Clone)]
pub struct LocalArtifactRepository {
    source: PathBuf,
    artifacts: Vec<ArtifactSpec>,
}

impl LocalArtifactRepository {
    /// Create a repository reading from `source`.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, artifacts: Vec<ArtifactSpec>) -> Self {
        Self {
            source: source.into(),
            artifacts,
        }
    }
}

impl ArtifactRepository for LocalArtifactRepository {
    fn resolve(&self, lib_dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        std::fs::create_dir_all(lib_dir)?;

        let mut resolved = Vec::with_capacity(self.artifacts.len());
        for artifact in &self.artifacts {
            let src = self.source.join(&artifact.file_name);
            let bytes = std::fs::read(&src).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ArtifactError::Missing {
                    name: artifact.file_name.clone(),
                    path: src.clone(),
                },
                _ => ArtifactError::Io(e),
            })?;

            if let Some(expected) = &artifact.blake3 {
                let actual = digest(&bytes);
                if !actual.eq_ignore_ascii_case(expected) {
                    return Err(ArtifactError::DigestMismatch {
                        name: artifact.file_name.clone(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }

            let dest = lib_dir.join(&artifact.file_name);
            std::fs::write(&dest, &bytes)?;
            debug!(artifact = %artifact.file_name, dest = %dest.display(), "Resolved artifact");
            resolved.push(dest);
        }

        Ok(resolved)
    }
}

/// `blake3:<hex>` digest of `bytes`.
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}
