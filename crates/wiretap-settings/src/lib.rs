//! # wiretap-settings
//!
//! Configuration for the capture pipeline, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`WiretapSettings::default()`]
//! 2. **Settings file**: `~/.wiretap/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CHROMIUM_*`, `RESEARCHER_*` and
//!    `CONTROLLER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
