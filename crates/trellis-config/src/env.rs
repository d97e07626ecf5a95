//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override: they only apply to fields that
//! no config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::{contains_path, set_path};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

/// All supported `TRELLIS_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "TRELLIS_PLUGINS_ROOT",
        field_path: "plugins.root",
    },
    EnvMapping {
        var_name: "TRELLIS_DISABLED_FILE",
        field_path: "plugins.disabled_file",
    },
    EnvMapping {
        var_name: "TRELLIS_HOST_VERSION",
        field_path: "plugins.host_version",
    },
    EnvMapping {
        var_name: "TRELLIS_LOG_LEVEL",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "TRELLIS_LOG_FORMAT",
        field_path: "logging.format",
    },
];

/// Snapshot the process environment variables relevant to trellis.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("TRELLIS_"))
        .collect()
}

/// Apply env var fallbacks to `merged` for every field that `file_layers`
/// did not set. Returns the number of fields filled from the environment.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    file_layers: &[&toml::Value],
    env_vars: &HashMap<String, String>,
) -> usize {
    let mut applied = 0usize;
    for mapping in ENV_MAPPINGS {
        let Some(value) = env_vars.get(mapping.var_name) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        if file_layers
            .iter()
            .any(|layer| contains_path(layer, mapping.field_path))
        {
            debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "config file sets field; ignoring env fallback"
            );
            continue;
        }
        set_path(
            merged,
            mapping.field_path,
            toml::Value::String(value.clone()),
        );
        applied = applied.saturating_add(1);
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn env_fills_unset_fields() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"info\"").unwrap();
        let applied = apply_env_fallbacks(
            &mut merged,
            &[],
            &env(&[("TRELLIS_LOG_LEVEL", "debug"), ("TRELLIS_HOST_VERSION", "2.0.0")]),
        );

        assert_eq!(applied, 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["plugins"]["host_version"].as_str(), Some("2.0.0"));
    }

    #[test]
    fn file_value_wins_over_env() {
        let user: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut merged = user.clone();
        let applied =
            apply_env_fallbacks(&mut merged, &[&user], &env(&[("TRELLIS_LOG_LEVEL", "trace")]));

        assert_eq!(applied, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut merged: toml::Value = toml::from_str("").unwrap();
        let applied =
            apply_env_fallbacks(&mut merged, &[], &env(&[("TRELLIS_PLUGINS_ROOT", "  ")]));
        assert_eq!(applied, 0);
    }
}
