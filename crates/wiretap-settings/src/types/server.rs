//! Relay, server and logging settings.

use serde::{Deserialize, Serialize};

/// Live relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Mount the relay push endpoint.
    pub enabled: bool,
    /// Path to the YAML feed rules.
    pub config_path: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            config_path: "./config/relay.yaml".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Listen address (`host:port`).
    pub bind_addr: String,
    /// Seconds to wait for in-flight work at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8188".to_string(),
            shutdown_timeout_secs: 10,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for the rolling log file. Empty disables file logging.
    pub dir: String,
    /// Log file name prefix.
    pub file_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file_name: "wiretap.log".to_string(),
        }
    }
}
