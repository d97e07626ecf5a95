//! Configuration struct definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level trellis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin runtime settings.
    pub plugins: PluginsSection,
    /// Logging settings.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// PluginsSection
// ---------------------------------------------------------------------------

/// Where modules live and which host version they are checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    /// Plugin root directory. Each immediate subdirectory is one module.
    /// A leading `~/` is expanded to the home directory at load time.
    pub root: String,
    /// File holding the persisted disabled-module set. `None` places it
    /// inside the plugin root as `.disabled.toml`.
    pub disabled_file: Option<String>,
    /// Override for the host version modules are checked against. `None`
    /// means the embedding application supplies its own version.
    pub host_version: Option<String>,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            root: "~/.trellis/plugins".to_owned(),
            disabled_file: None,
            host_version: None,
        }
    }
}

impl PluginsSection {
    /// The plugin root as a path.
    #[must_use]
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }

    /// The disabled-set file, when one is configured.
    #[must_use]
    pub fn disabled_path(&self) -> Option<PathBuf> {
        self.disabled_file.as_ref().map(PathBuf::from)
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["trellis_plugins=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugins_section_paths() {
        let mut section = PluginsSection::default();
        assert_eq!(section.root_path(), PathBuf::from("~/.trellis/plugins"));
        assert!(section.disabled_path().is_none());

        section.disabled_file = Some("/etc/trellis/disabled.toml".into());
        assert_eq!(
            section.disabled_path(),
            Some(PathBuf::from("/etc/trellis/disabled.toml"))
        );
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config: Config = toml::from_str("[logging]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "compact");
        assert!(config.plugins.host_version.is_none());
    }
}
