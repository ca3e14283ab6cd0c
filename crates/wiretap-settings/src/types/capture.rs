//! Browser endpoint, storage and capture settings.

use serde::{Deserialize, Serialize};

const MIB: usize = 1024 * 1024;

/// Browser debugging endpoint and attach behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CdpSettings {
    /// Debugging endpoint host.
    pub address: String,
    /// Debugging endpoint port.
    pub port: u16,
    /// Case-insensitive substring a page URL must contain to be captured.
    /// Empty matches every page.
    pub tab_url_filter: String,
    /// Reload each page after attaching so its startup traffic is captured.
    pub reload_on_attach: bool,
    /// Timeout for a single protocol command, in milliseconds.
    pub command_timeout_ms: u64,
}

impl CdpSettings {
    /// HTTP base URL of the debugging endpoint.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl Default for CdpSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 9220,
            tab_url_filter: "tradingview.com".to_string(),
            reload_on_attach: true,
            command_timeout_ms: 30_000,
        }
    }
}

/// Output layout and rotation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Root of the capture tree.
    pub data_dir: String,
    /// Size at which a log file is rotated, in MiB.
    pub max_file_size_mb: u64,
    /// Queue capacity of each log writer.
    pub buffer_size: usize,
    /// Rotated backups kept per log file.
    pub max_backups: usize,
    /// Rotated backups older than this many days are removed.
    pub max_age_days: u64,
    /// Gzip rotated backups.
    pub compress_backups: bool,
}

impl StorageSettings {
    /// Rotation threshold in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(MIB as u64)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "./research_data".to_string(),
            max_file_size_mb: 200,
            buffer_size: 5000,
            max_backups: 100,
            max_age_days: 30,
            compress_backups: false,
        }
    }
}

/// What to capture. Byte limits of `0` disable truncation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Persist HTTP exchanges.
    pub http: bool,
    /// Persist `WebSocket` events.
    pub websocket: bool,
    /// Write static resources (scripts, images, ...) to disk.
    pub static_resources: bool,
    /// Limit for HTTP bodies in log records.
    pub http_max_body_bytes: usize,
    /// Limit for `WebSocket` frame payloads.
    pub ws_max_frame_bytes: usize,
    /// Limit for static resource files.
    pub resource_max_bytes: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            http: true,
            websocket: true,
            static_resources: true,
            http_max_body_bytes: 50 * MIB,
            ws_max_frame_bytes: 20 * MIB,
            resource_max_bytes: 100 * MIB,
        }
    }
}
