//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SitesmithSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SITESMITH_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SitesmithSettings;

/// Data directory (`$SITESMITH_HOME` or `~/.sitesmith`).
pub fn data_dir() -> PathBuf {
    if let Some(dir) = read_env_string("SITESMITH_HOME") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sitesmith")
}

/// Resolve the path to the settings file.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SitesmithSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SitesmithSettings> {
    let defaults = serde_json::to_value(SitesmithSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SitesmithSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, arrays and primitives are replaced, and nulls in
/// `source` keep the target value.
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut SitesmithSettings) {
    if let Some(v) = read_env_string("SITESMITH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("SITESMITH_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("SITESMITH_PUBLIC_URL") {
        settings.server.public_base_url = Some(v);
    }
    if let Some(v) = read_env_string("SITESMITH_API_URL") {
        settings.generation.api_url = v;
    }
    if let Some(v) = read_env_string("SITESMITH_MODEL") {
        settings.generation.model = v;
    }
    if let Some(v) = read_env_u64("SITESMITH_TIMEOUT_MS", 1000, 600_000) {
        settings.generation.timeout_ms = v;
    }
    if let Some(v) = read_env_u64("SITESMITH_COOLDOWN_MS", 0, 3_600_000) {
        settings.workspace.cooldown_ms = v;
    }
    if let Some(v) = read_env_usize("SITESMITH_MIN_MODIFY_CHARS", 0, 1_000_000) {
        settings.workspace.min_modify_chars = v;
    }
    if let Some(v) = read_env_string("SITESMITH_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string("SITESMITH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("SITESMITH_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
