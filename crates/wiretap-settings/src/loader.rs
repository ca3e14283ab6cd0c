//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WiretapSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::WiretapSettings;

/// Resolve the path to the settings file (`~/.wiretap/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wiretap").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WiretapSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WiretapSettings> {
    let defaults = serde_json::to_value(WiretapSettings::default()).map_err(SettingsError::Shape)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WiretapSettings =
        serde_json::from_value(merged).map_err(SettingsError::Shape)?;
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut WiretapSettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// - Integers must parse and fall within the accepted range
/// - Booleans accept `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`
/// - Empty or invalid values are ignored with a warning
pub fn apply_env_overrides_from<F>(settings: &mut WiretapSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Browser endpoint ────────────────────────────────────────────
    if let Some(v) = env.string("CHROMIUM_CDP_ADDRESS") {
        settings.cdp.address = v;
    }
    if let Some(v) = env.u16("CHROMIUM_CDP_PORT", 1, 65535) {
        settings.cdp.port = v;
    }
    if let Some(v) = env.string("RESEARCHER_TAB_URL_FILTER") {
        settings.cdp.tab_url_filter = v;
    }
    if let Some(v) = env.bool("RESEARCHER_RELOAD_ON_ATTACH") {
        settings.cdp.reload_on_attach = v;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RESEARCHER_DATA_DIR") {
        settings.storage.data_dir = v;
    }
    if let Some(v) = env.u64("RESEARCHER_MAX_FILE_SIZE_MB", 1, 1_048_576) {
        settings.storage.max_file_size_mb = v;
    }
    if let Some(v) = env.usize("RESEARCHER_BUFFER_SIZE", 1, 10_000_000) {
        settings.storage.buffer_size = v;
    }

    // ── Capture ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("RESEARCHER_CAPTURE_HTTP") {
        settings.capture.http = v;
    }
    if let Some(v) = env.bool("RESEARCHER_CAPTURE_WS") {
        settings.capture.websocket = v;
    }
    if let Some(v) = env.bool("RESEARCHER_CAPTURE_STATIC") {
        settings.capture.static_resources = v;
    }
    if let Some(v) = env.usize("RESEARCHER_HTTP_MAX_BODY_BYTES", 0, usize::MAX) {
        settings.capture.http_max_body_bytes = v;
    }
    if let Some(v) = env.usize("RESEARCHER_WS_MAX_FRAME_BYTES", 0, usize::MAX) {
        settings.capture.ws_max_frame_bytes = v;
    }
    if let Some(v) = env.usize("RESEARCHER_RESOURCE_MAX_BYTES", 0, usize::MAX) {
        settings.capture.resource_max_bytes = v;
    }

    // ── Relay / server / logging ────────────────────────────────────
    if let Some(v) = env.bool("CONTROLLER_RELAY_ENABLED") {
        settings.relay.enabled = v;
    }
    if let Some(v) = env.string("CONTROLLER_RELAY_CONFIG") {
        settings.relay.config_path = v;
    }
    if let Some(v) = env.string("CONTROLLER_BIND_ADDR") {
        settings.server.bind_addr = v;
    }
    if let Some(v) = env.string("RESEARCHER_LOG_LEVEL") {
        settings.logging.level = v.to_lowercase();
    }
    if let Some(v) = env.string("RESEARCHER_LOG_DIR") {
        settings.logging.dir = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name)
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.raw(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
