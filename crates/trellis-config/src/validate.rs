//! Range checks on a merged configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Check every section, stopping at the first bad field.
///
/// # Errors
///
/// [`ConfigError::Invalid`] naming that field.
pub fn validate(config: &Config) -> ConfigResult<()> {
    let plugins = &config.plugins;
    if plugins.root.trim().is_empty() {
        return Err(invalid("plugins.root", "plugin root must not be empty"));
    }
    if plugins
        .disabled_file
        .as_deref()
        .is_some_and(|file| file.trim().is_empty())
    {
        return Err(invalid(
            "plugins.disabled_file",
            "disabled file must not be empty when set",
        ));
    }
    if let Some(version) = plugins.host_version.as_deref()
        && let Err(e) = semver::Version::parse(version)
    {
        return Err(invalid(
            "plugins.host_version",
            format!("'{version}' is not a semantic version: {e}"),
        ));
    }

    one_of("logging.level", &config.logging.level, LOG_LEVELS)?;
    one_of("logging.format", &config.logging.format, LOG_FORMATS)
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> ConfigResult<()> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(invalid(
        field,
        format!("'{value}' is not one of {}", allowed.join(" | ")),
    ))
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        message: message.into(),
    }
}
