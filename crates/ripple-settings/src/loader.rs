//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RippleSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RIPPLE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogLevel, RippleSettings};

/// Resolve the settings file path.
///
/// `$RIPPLE_HOME/settings.json` when `RIPPLE_HOME` is set, otherwise
/// `~/.ripple/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(home) = read_env_string("RIPPLE_HOME") {
        return PathBuf::from(home).join("settings.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ripple").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RippleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a settings combination
/// rejected by [`RippleSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RippleSettings> {
    let defaults = serde_json::to_value(RippleSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RippleSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RIPPLE_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RippleSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept.
pub fn apply_overrides_with(
    settings: &mut RippleSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let server = &mut settings.server;

    if let Some(v) = read("RIPPLE_HOST") {
        server.host = v;
    }
    if let Some(v) = read("RIPPLE_PORT") {
        match parse_u16_range(&v, 1, 65535) {
            Some(port) => server.port = port,
            None => warn!(key = "RIPPLE_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("RIPPLE_MAX_CONNECTIONS") {
        match parse_usize_range(&v, 1, 100_000) {
            Some(n) => server.max_connections = n,
            None => warn!(key = "RIPPLE_MAX_CONNECTIONS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("RIPPLE_HEARTBEAT_INTERVAL_MS") {
        match parse_u64_range(&v, 100, 600_000) {
            Some(n) => server.heartbeat_interval_ms = n,
            None => warn!(key = "RIPPLE_HEARTBEAT_INTERVAL_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("RIPPLE_HEARTBEAT_TIMEOUT_MS") {
        match parse_u64_range(&v, 100, 3_600_000) {
            Some(n) => server.heartbeat_timeout_ms = n,
            None => warn!(key = "RIPPLE_HEARTBEAT_TIMEOUT_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("RIPPLE_SEND_QUEUE_CAPACITY") {
        match parse_usize_range(&v, 1, 65_536) {
            Some(n) => server.send_queue_capacity = n,
            None => warn!(key = "RIPPLE_SEND_QUEUE_CAPACITY", value = %v, "invalid env var, ignoring"),
        }
    }

    let logging = &mut settings.logging;
    if let Some(v) = read("RIPPLE_LOG_LEVEL") {
        match LogLevel::parse(&v) {
            Some(level) => logging.level = level,
            None => warn!(key = "RIPPLE_LOG_LEVEL", value = %v, "invalid log level env var, ignoring"),
        }
    }
    if let Some(v) = read("RIPPLE_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => logging.json = json,
            None => warn!(key = "RIPPLE_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn load_settings_reads_default_path() {
        let to_value = |s: RippleSettings| serde_json::to_value(s).unwrap();
        let direct = load_settings_from_path(&settings_path()).map(to_value);
        let via_default = load_settings().map(to_value);
        match (direct, via_default) {
            (Ok(a), Ok(b)) => assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            (a, b) => panic!("default-path load diverged: {a:?} vs {b:?}"),
        }
    }

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"server": {"host": "0.0.0.0", "port": 8000}});
        let source = json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
        assert_eq!(merged["server"]["port"], 9000);
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2, 3]}), json!({"a": [4]}));
        assert_eq!(merged["a"], json!([4]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.max_name_chars, 64);
        assert_eq!(settings.name, "ripple");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"server":{"maxConnections":12,"maxNameChars":20}}"#)
            .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.max_connections, 12);
        assert_eq!(settings.server.max_name_chars, 20);
        assert_eq!(settings.server.send_queue_capacity, 64);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_combination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"heartbeatIntervalMs":5000,"heartbeatTimeoutMs":1000}}"#,
        )
        .unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = RippleSettings::default();
        apply_overrides_with(
            &mut settings,
            env(&[
                ("RIPPLE_HOST", "127.0.0.1"),
                ("RIPPLE_PORT", "9443"),
                ("RIPPLE_SEND_QUEUE_CAPACITY", "8"),
                ("RIPPLE_LOG_LEVEL", "debug"),
                ("RIPPLE_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9443);
        assert_eq!(settings.server.send_queue_capacity, 8);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert!(settings.logging.json);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut settings = RippleSettings::default();
        apply_overrides_with(
            &mut settings,
            env(&[
                ("RIPPLE_PORT", "0"),
                ("RIPPLE_MAX_CONNECTIONS", "lots"),
                ("RIPPLE_HEARTBEAT_INTERVAL_MS", "5"),
                ("RIPPLE_LOG_LEVEL", "shouty"),
                ("RIPPLE_LOG_JSON", "maybe"),
            ]),
        );
        let defaults = RippleSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.max_connections, defaults.server.max_connections);
        assert_eq!(
            settings.server.heartbeat_interval_ms,
            defaults.server.heartbeat_interval_ms
        );
        assert_eq!(settings.logging.level, LogLevel::Info);
        assert!(!settings.logging.json);
    }

    #[test]
    fn empty_override_is_ignored() {
        let mut settings = RippleSettings::default();
        apply_overrides_with(&mut settings, env(&[("RIPPLE_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("250", 100, 1000), Some(250));
        assert_eq!(parse_u64_range("99", 100, 1000), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }

    #[test]
    fn settings_path_ends_with_file_name() {
        assert!(settings_path().ends_with("settings.json"));
    }
}
