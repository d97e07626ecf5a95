//! Layered loading.
//!
//! [`load_with_env`] builds one TOML tree from the embedded defaults and the
//! user file `~/.trellis/config.toml`, fills fields neither layer set from
//! `TRELLIS_*` variables, deserializes it into [`Config`], expands a leading
//! `~` in path fields, and validates the result.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Files above this size are refused before parsing.
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load every layer. `home_override` replaces the detected home directory.
///
/// # Errors
///
/// [`ConfigError::NoHomeDir`] when no home directory can be found, or any
/// error of [`load_with_env`].
pub fn load(home_override: Option<&Path>) -> ConfigResult<Config> {
    let home_dir = match home_override {
        Some(home) => home.to_path_buf(),
        None => directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or(ConfigError::NoHomeDir)?,
    };
    load_with_env(&home_dir, &collect_env_vars())
}

/// Load every layer against an explicit home directory and environment.
///
/// # Errors
///
/// [`ConfigError::Read`], [`ConfigError::TooLarge`] or [`ConfigError::Parse`]
/// for a bad user file, [`ConfigError::Invalid`] when the merged values are
/// out of range.
pub fn load_with_env(home_dir: &Path, env_vars: &HashMap<String, String>) -> ConfigResult<Config> {
    let mut tree = parse_toml::<toml::Value>(DEFAULTS_TOML, "<embedded defaults>")?;

    let user_path = home_dir.join(".trellis").join("config.toml");
    let user = read_capped(&user_path)?
        .map(|text| parse_toml::<toml::Value>(&text, &user_path.display().to_string()))
        .transpose()?;
    if let Some(layer) = &user {
        deep_merge(&mut tree, layer);
        info!(path = %user_path.display(), "Loaded user config");
    }

    let filled = apply_env_fallbacks(&mut tree, &user.iter().collect::<Vec<_>>(), env_vars);
    if filled > 0 {
        debug!(count = filled, "Filled config fields from the environment");
    }

    let mut config: Config = tree.try_into().map_err(|source| ConfigError::Parse {
        origin: "<merged config>".to_owned(),
        source,
    })?;
    config.plugins.root = expand_home(&config.plugins.root, home_dir);
    if let Some(file) = config.plugins.disabled_file.as_mut() {
        *file = expand_home(file, home_dir);
    }

    validate::validate(&config)?;
    Ok(config)
}

/// Load and validate a single file, without defaults or environment.
///
/// # Errors
///
/// [`ConfigError::Read`] if the file is missing or unreadable, otherwise as
/// for [`load_with_env`].
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let Some(text) = read_capped(path)? else {
        return Err(ConfigError::Read {
            path: path.to_path_buf(),
            source: io::ErrorKind::NotFound.into(),
        });
    };
    let config: Config = parse_toml(&text, &path.display().to_string())?;
    validate::validate(&config)?;
    Ok(config)
}

/// Contents of `path`, `None` if it does not exist.
fn read_capped(path: &Path) -> ConfigResult<Option<String>> {
    let read_error = |source: io::Error| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    };
    let too_large = |size: u64| ConfigError::TooLarge {
        path: path.to_path_buf(),
        size,
        limit: MAX_CONFIG_FILE_SIZE,
    };

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No config file");
            return Ok(None);
        },
        Err(e) => return Err(read_error(e)),
    };
    let size = file.metadata().map_err(read_error)?.len();
    if size > MAX_CONFIG_FILE_SIZE {
        return Err(too_large(size));
    }

    let mut text = String::new();
    file.take(MAX_CONFIG_FILE_SIZE.saturating_add(1))
        .read_to_string(&mut text)
        .map_err(read_error)?;
    let read = u64::try_from(text.len()).unwrap_or(u64::MAX);
    if read > MAX_CONFIG_FILE_SIZE {
        return Err(too_large(read));
    }
    Ok(Some(text))
}

fn parse_toml<T: serde::de::DeserializeOwned>(text: &str, origin: &str) -> ConfigResult<T> {
    toml::from_str(text).map_err(|source| ConfigError::Parse {
        origin: origin.to_owned(),
        source,
    })
}

/// Expand a leading `~/` (or a bare `~`) against `home_dir`.
fn expand_home(raw: &str, home_dir: &Path) -> String {
    if raw == "~" {
        return home_dir.display().to_string();
    }
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir.join(rest).display().to_string(),
        None => raw.to_owned(),
    }
}
