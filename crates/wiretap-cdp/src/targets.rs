//! Target discovery over the debugging HTTP endpoint.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::CdpError;

/// One entry of `/json/list`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target id.
    pub id: String,
    /// Target type (`page`, `service_worker`, ...).
    #[serde(rename = "type")]
    pub target_type: String,
    /// Page title.
    #[serde(default)]
    pub title: String,
    /// Current URL.
    #[serde(default)]
    pub url: String,
}

impl TargetInfo {
    /// Whether this target is a regular page.
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

/// `/json/version`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrowserVersion {
    /// Browser product string.
    #[serde(rename = "Browser", default)]
    pub browser: String,
    /// Browser-level protocol socket.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

/// Case-insensitive substring match. An empty filter matches everything.
pub fn matches_filter(url: &str, filter: &str) -> bool {
    filter.is_empty() || url.to_lowercase().contains(&filter.to_lowercase())
}

/// Client for the `/json/*` endpoints.
#[derive(Debug, Clone)]
pub struct TargetDiscovery {
    http: reqwest::Client,
    base_url: String,
}

impl TargetDiscovery {
    /// Discovery against `base_url` (e.g. `http://127.0.0.1:9220`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Browser version and socket URL.
    pub async fn version(&self) -> Result<BrowserVersion, CdpError> {
        self.get_json("/json/version").await
    }

    /// Every open target.
    pub async fn list(&self) -> Result<Vec<TargetInfo>, CdpError> {
        self.get_json("/json/list").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CdpError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "querying browser endpoint");
        let discovery_err = |reason: String| CdpError::Discovery {
            url: url.clone(),
            reason,
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| discovery_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(discovery_err(format!("HTTP {}", resp.status())));
        }
        resp.json::<T>()
            .await
            .map_err(|e| discovery_err(e.to_string()))
    }
}
