//! Module identity and version metadata.
//!
//! Every module directory carries a `plugin.toml`:
//!
//! ```toml
//! name = "hello-tools"
//! version = "1.2.0"
//! author = "Jane Doe"
//! description = "Greeting tools"
//! home-page = "https://example.org/hello-tools"
//! host-version = "0.3.0"
//! icon = "icon.png"
//! ```
//!
//! `name`, `version` and `host-version` are required. Parsing is split in
//! two steps: the file is deserialized into loosely typed raw properties,
//! then every field is checked and converted into [`Metadata`].

use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PluginError, PluginResult};

/// Maximum accepted size of a metadata file.
const MAX_METADATA_FILE_SIZE: u64 = 64 * 1024;

/// Maximum module name length, in characters.
const MAX_NAME_LEN: usize = 128;

/// Process-wide unique module identity.
///
/// Names are free-form display strings (`"Hello Tools"` is fine) but must be
/// usable as a single directory name: non-blank, no path separators, not
/// `.`/`..`, no control characters, at most 128 characters. Leading and
/// trailing whitespace is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModuleName(String);

/// Deserialize with validation, so a crafted preferences file cannot smuggle
/// a path through a module name.
impl<'de> Deserialize<'de> for ModuleName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl ModuleName {
    /// Create a validated name.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidName`] if the name breaks a naming rule.
    pub fn new(name: impl Into<String>) -> PluginResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        Self::validate(trimmed)?;
        Ok(Self(trimmed.to_owned()))
    }

    /// Create a name without validation (for tests and constants).
    #[must_use]
    pub fn from_static(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> PluginResult<()> {
        if name.is_empty() {
            return Err(PluginError::InvalidName(
                "module name must not be blank".into(),
            ));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(PluginError::InvalidName(format!(
                "module name exceeds {MAX_NAME_LEN} characters"
            )));
        }
        if name == "." || name == ".." {
            return Err(PluginError::InvalidName(format!(
                "module name must not be '{name}'"
            )));
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
        {
            return Err(PluginError::InvalidName(format!(
                "module name contains forbidden character {c:?}: {name}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Raw declared properties, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMetadata {
    name: Option<String>,
    version: Option<String>,
    author: Option<String>,
    description: Option<String>,
    home_page: Option<String>,
    host_version: Option<String>,
    icon: Option<String>,
}

/// Validated module metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Metadata {
    /// Module identity.
    pub name: ModuleName,
    /// Module version.
    pub version: Version,
    /// Minimum host version the module runs on.
    pub host_version: Version,
    /// Author, free-form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Short description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Project page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_page: Option<Url>,
    /// Icon file, relative to the module directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,
}

impl Metadata {
    /// Read and validate a metadata file.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] if the file cannot be read, is too
    /// large, or fails [`Metadata::parse`].
    pub fn load(path: &Path) -> PluginResult<Self> {
        let invalid = |message: String| PluginError::Validation {
            path: path.to_path_buf(),
            message,
        };

        let too_large = |size: u64| {
            invalid(format!(
                "metadata file is {size} bytes, exceeding the {MAX_METADATA_FILE_SIZE} byte limit"
            ))
        };
        let unreadable = |e: std::io::Error| invalid(format!("failed to read metadata file: {e}"));

        let file = File::open(path).map_err(unreadable)?;
        let size = file.metadata().map_err(unreadable)?.len();
        if size > MAX_METADATA_FILE_SIZE {
            return Err(too_large(size));
        }

        // The file may grow after the size check; never read past the cap.
        let mut content = String::new();
        file.take(MAX_METADATA_FILE_SIZE.saturating_add(1))
            .read_to_string(&mut content)
            .map_err(unreadable)?;
        let read = u64::try_from(content.len()).unwrap_or(u64::MAX);
        if read > MAX_METADATA_FILE_SIZE {
            return Err(too_large(read));
        }

        Self::parse(&content, path)
    }

    /// Parse and validate metadata text. `origin` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] if the text is not TOML, a required
    /// field is missing or blank, a version is not a semantic version, the
    /// home page is not a URL or the icon path escapes the module directory.
    pub fn parse(content: &str, origin: &Path) -> PluginResult<Self> {
        let invalid = |message: String| PluginError::Validation {
            path: origin.to_path_buf(),
            message,
        };

        let raw: RawMetadata =
            toml::from_str(content).map_err(|e| invalid(format!("not valid TOML: {e}")))?;

        let name = required(raw.name, "name").map_err(&invalid)?;
        let name = ModuleName::new(name).map_err(|e| invalid(e.to_string()))?;

        let version = parse_version(raw.version, "version").map_err(&invalid)?;
        let host_version = parse_version(raw.host_version, "host-version").map_err(&invalid)?;

        let home_page = match non_blank(raw.home_page) {
            Some(s) => Some(
                Url::parse(&s).map_err(|e| invalid(format!("home-page '{s}' is not a URL: {e}")))?,
            ),
            None => None,
        };

        let icon = match non_blank(raw.icon) {
            Some(s) => Some(relative_path(&s).map_err(&invalid)?),
            None => None,
        };

        Ok(Self {
            name,
            version,
            host_version,
            author: non_blank(raw.author),
            description: non_blank(raw.description),
            home_page,
            icon,
        })
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)?;
        if let Some(author) = &self.author {
            write!(f, " by {author}")?;
        }
        Ok(())
    }
}

/// Reject a module whose minimum host version is newer than `host`.
///
/// Semver precedence applies: `1.0.0-rc.1` is older than `1.0.0`, and build
/// metadata (`1.0.0+build.7`) is ignored.
///
/// # Errors
///
/// Returns [`PluginError::Incompatible`] if the host is too old.
pub fn check_compatibility(metadata: &Metadata, host: &Version) -> PluginResult<()> {
    if metadata.host_version.cmp_precedence(host) == Ordering::Greater {
        return Err(PluginError::Incompatible {
            name: metadata.name.clone(),
            required: metadata.host_version.clone(),
            host: host.clone(),
        });
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn required(value: Option<String>, field: &str) -> Result<String, String> {
    non_blank(value).ok_or_else(|| format!("required field '{field}' is missing or blank"))
}

fn parse_version(value: Option<String>, field: &str) -> Result<Version, String> {
    let raw = required(value, field)?;
    Version::parse(&raw).map_err(|e| format!("{field} '{raw}' is not a semantic version: {e}"))
}

fn relative_path(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(format!(
            "icon '{raw}' must be a relative path inside the module directory"
        ));
    }
    Ok(path)
}
