//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may contain any subset of fields; missing fields keep their
//! compiled default.

mod capture;
mod server;

pub use capture::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "cdp": { "port": 9222, "tabUrlFilter": "example.com" },
///   "capture": { "staticResources": false }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WiretapSettings {
    /// Browser debugging endpoint.
    pub cdp: CdpSettings,
    /// Output layout and rotation.
    pub storage: StorageSettings,
    /// What to capture and how much of it.
    pub capture: CaptureSettings,
    /// Live relay.
    pub relay: RelaySettings,
    /// HTTP server.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl WiretapSettings {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cdp.port == 0 {
            return Err(SettingsError::invalid("cdp.port", "must be > 0"));
        }
        if self.cdp.command_timeout_ms == 0 {
            return Err(SettingsError::invalid("cdp.commandTimeoutMs", "must be > 0"));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(SettingsError::invalid("storage.dataDir", "must not be empty"));
        }
        if self.storage.buffer_size == 0 {
            return Err(SettingsError::invalid("storage.bufferSize", "must be > 0"));
        }
        if self.relay.enabled && self.relay.config_path.trim().is_empty() {
            return Err(SettingsError::invalid(
                "relay.configPath",
                "required when the relay is enabled",
            ));
        }
        Ok(())
    }
}
