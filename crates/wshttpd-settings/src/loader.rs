//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `WSHTTPD_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ServerSettings;

/// Resolve the path to the settings file (`~/.wshttpd/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wshttpd").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ServerSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ServerSettings> {
    let mut settings = load_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file(path: &Path) -> Result<ServerSettings> {
    let defaults = serde_json::to_value(ServerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `WSHTTPD_*` environment variable overrides.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut ServerSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
pub fn apply_overrides(settings: &mut ServerSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(v) = read_string(lookup, "WSHTTPD_HOST") {
        settings.host = v;
    }
    if let Some(v) = read_u64(lookup, "WSHTTPD_PORT", 0, u64::from(u16::MAX)) {
        settings.port = u16::try_from(v).unwrap_or(settings.port);
    }
    if let Some(v) = read_usize(lookup, "WSHTTPD_MAX_MESSAGE_SIZE", 125, 1 << 30) {
        settings.max_message_size = v;
    }
    if let Some(v) = read_usize(lookup, "WSHTTPD_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.max_connections = v;
    }
    if let Some(v) = read_u64(lookup, "WSHTTPD_PING_INTERVAL_SECS", 0, 86_400) {
        settings.ping_interval_secs = v;
    }
    if let Some(v) = read_string(lookup, "WSHTTPD_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = read_string(lookup, "WSHTTPD_AUTH_MESSAGE") {
        settings.auth_message = Some(v);
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Readers ─────────────────────────────────────────────────────────────────

fn read_string(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_u64(lookup: &dyn Fn(&str) -> Option<String>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

fn read_usize(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    min: usize,
    max: usize,
) -> Option<usize> {
    let val = lookup(name)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
