//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{FleetSettings, LogFormat, MAX_INTERVAL_SECS, MAX_TIMEOUT_SECS};

/// Resolve the default settings file (`~/.fleetpulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".fleetpulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FleetSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`FleetSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<FleetSettings> {
    let defaults = serde_json::to_value(FleetSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FleetSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `FLEETPULSE_*` environment overrides.
pub fn apply_env_overrides(settings: &mut FleetSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup.
///
/// Empty values are treated as unset. Values that fail to parse or fall out of
/// range are logged and ignored, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut FleetSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get("FLEETPULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = get("FLEETPULSE_PORT") {
        if let Some(port) = checked(&v, "FLEETPULSE_PORT", parse_u16_range(&v, 0, 65535)) {
            settings.server.port = port;
        }
    }
    if let Some(v) = get("FLEETPULSE_ENV") {
        settings.server.environment = v;
    }
    if let Some(v) = get("FLEETPULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = get("FLEETPULSE_LOG_FORMAT") {
        if let Some(format) = checked(&v, "FLEETPULSE_LOG_FORMAT", parse_log_format(&v)) {
            settings.logging.format = Some(format);
        }
    }
    if let Some(v) = get("FLEETPULSE_SIMULATOR_ENABLED") {
        if let Some(enabled) = checked(&v, "FLEETPULSE_SIMULATOR_ENABLED", parse_bool(&v)) {
            settings.simulator.enabled = enabled;
        }
    }
    if let Some(v) = get("FLEETPULSE_PING_INTERVAL_SECS") {
        if let Some(secs) = checked(
            &v,
            "FLEETPULSE_PING_INTERVAL_SECS",
            parse_u64_range(&v, 1, MAX_INTERVAL_SECS),
        ) {
            settings.hub.ping_interval_secs = secs;
        }
    }
    if let Some(v) = get("FLEETPULSE_IDLE_TIMEOUT_SECS") {
        if let Some(secs) = checked(
            &v,
            "FLEETPULSE_IDLE_TIMEOUT_SECS",
            parse_u64_range(&v, 0, MAX_TIMEOUT_SECS),
        ) {
            settings.hub.idle_timeout_secs = secs;
        }
    }
}

fn checked<T>(raw: &str, key: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within an inclusive range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse `compact` or `json`, any case.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "pretty" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}
