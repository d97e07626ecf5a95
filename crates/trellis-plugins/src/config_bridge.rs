//! Bridge from `trellis_config::Config` to runtime types.
//!
//! The config crate has no dependencies on other trellis crates. Conversion
//! into [`RuntimeOptions`] happens here, once.

use std::path::PathBuf;

use semver::Version;
use trellis_config::{Config, PluginsSection};

use crate::error::{PluginError, PluginResult};
use crate::manager::RuntimeOptions;

/// Convert the `[plugins]` section to [`RuntimeOptions`].
///
/// `host_version` is the embedding application's own version; a
/// `plugins.host_version` override in the config wins over it.
///
/// # Errors
///
/// Returns [`PluginError::Validation`] if the override is not valid semver.
pub fn to_runtime_options(cfg: &Config, host_version: &Version) -> PluginResult<RuntimeOptions> {
    from_section(&cfg.plugins, host_version)
}

/// Convert a bare `[plugins]` section. See [`to_runtime_options`].
///
/// # Errors
///
/// Returns [`PluginError::Validation`] if the override is not valid semver.
pub fn from_section(section: &PluginsSection, host_version: &Version) -> PluginResult<RuntimeOptions> {
    let host_version = match &section.host_version {
        Some(raw) => Version::parse(raw).map_err(|e| PluginError::Validation {
            path: PathBuf::from("plugins.host_version"),
            message: format!("invalid host version '{raw}': {e}"),
        })?,
        None => host_version.clone(),
    };

    let options = RuntimeOptions::new(section.root_path(), host_version);
    Ok(match section.disabled_path() {
        Some(file) => options.with_disabled_file(file),
        None => options,
    })
}
