//! Loading [`Settings`] from files and the environment.
//!
//! ## Loading order
//!
//! 1. Start with default settings.
//! 2. Merge a TOML or JSON document over them (missing keys keep defaults).
//! 3. Apply environment variable overrides.
//!
//! ## Environment variables
//!
//! | Env Var | Setting |
//! |---|---|
//! | `BULK_TRIGGERS_DEBUG` | `debug` |
//! | `BULK_TRIGGERS_LOG_LEVEL` | `log_level` |
//! | `BULK_TRIGGERS_DATABASE_ENGINE` | `database.engine` |
//! | `BULK_TRIGGERS_DATABASE_NAME` | `database.name` |
//! | `BULK_TRIGGERS_MAX_DEPTH` | `triggers.max_depth` |
//! | `BULK_TRIGGERS_DEBUG_VERBOSE` | `triggers.debug_verbose` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use bulk_triggers_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/triggers.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::{TriggerError, TriggerResult};
use crate::settings::Settings;

/// Loads settings from a TOML string merged over the defaults.
pub fn from_toml_str(toml_str: &str) -> TriggerResult<Settings> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| TriggerError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> TriggerResult<Settings> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file, then applies environment overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> TriggerResult<Settings> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string merged over the defaults.
pub fn from_json_str(json_str: &str) -> TriggerResult<Settings> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| TriggerError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> TriggerResult<Settings> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file, then applies environment overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> TriggerResult<Settings> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from environment variables only (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `BULK_TRIGGERS_*` environment overrides.
///
/// Boolean variables accept "true"/"1"/"yes" (case-insensitive); anything else
/// is false. Unparseable numbers are ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

fn apply_overrides_from(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("BULK_TRIGGERS_DEBUG") {
        settings.debug = parse_bool(&val);
    }

    if let Some(val) = lookup("BULK_TRIGGERS_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Some(val) = lookup("BULK_TRIGGERS_DATABASE_ENGINE") {
        settings.database.engine = val;
    }

    if let Some(val) = lookup("BULK_TRIGGERS_DATABASE_NAME") {
        settings.database.name = val;
    }

    if let Some(val) = lookup("BULK_TRIGGERS_MAX_DEPTH") {
        if let Ok(depth) = val.trim().parse::<usize>() {
            settings.triggers.max_depth = depth;
        }
    }

    if let Some(val) = lookup("BULK_TRIGGERS_DEBUG_VERBOSE") {
        settings.triggers.debug_verbose = parse_bool(&val);
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_bool(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_config(path: &Path, format: &str) -> TriggerResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        TriggerError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(value: serde_json::Value, format: &str) -> TriggerResult<Settings> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        TriggerError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;
    serde_json::from_value(merge_json(default_json, value)).map_err(|e| {
        TriggerError::ConfigurationError(format!(
            "Failed to deserialize settings from {format}: {e}"
        ))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Deep-merges two JSON values; `override_val` wins.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(base_v) => merge_json(base_v, override_v),
                    None => override_v,
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}
