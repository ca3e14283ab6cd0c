//! Raw static resources on disk.

use std::path::{Path, PathBuf};

use chrono::Utc;
use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use crate::errors::StorageError;

/// Fallback file name when the URL yields none.
pub const DEFAULT_RESOURCE_NAME: &str = "resource";

/// Directory for a static resource type, or `None` when the type is not
/// captured as a static resource.
pub fn static_resource_dir(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        "" | "XHR" | "Fetch" | "WebSocket" | "EventSource" | "Ping" => None,
        "Script" => Some("js"),
        "Stylesheet" => Some("css"),
        "Image" => Some("img"),
        "Font" => Some("font"),
        "Media" => Some("media"),
        "Document" => Some("docs"),
        "Manifest" => Some("manifest"),
        _ => Some("other"),
    }
}

/// Safe file name from the last segment of a URL path.
pub fn filename_from_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return DEFAULT_RESOURCE_NAME.to_string();
    };
    let last = url.path().rsplit('/').next().unwrap_or_default();
    let decoded = percent_decode_str(last).decode_utf8_lossy();
    let name = decoded.replace(['/', '\\'], "_");
    if name.is_empty() || name == "." || name == ".." {
        DEFAULT_RESOURCE_NAME.to_string()
    } else {
        name
    }
}

/// Writes static resources to `<base>/<date>/<route>/resources/<dir>/<file>`.
#[derive(Debug, Clone)]
pub struct ResourceWriter {
    base_dir: PathBuf,
}

impl ResourceWriter {
    /// Writer rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Root of the capture tree.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `data` and return the file path. Existing files are replaced.
    pub async fn write(
        &self,
        route: &str,
        resource_dir: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self
            .base_dir
            .join(Utc::now().format("%Y-%m-%d").to_string())
            .join(route)
            .join("resources")
            .join(resource_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        let path = dir.join(filename);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        debug!(file = %path.display(), bytes = data.len(), "wrote static resource");
        Ok(path)
    }
}
