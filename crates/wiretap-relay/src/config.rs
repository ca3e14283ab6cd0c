//! Feed rules loaded from YAML.
//!
//! ```yaml
//! feeds:
//!   - name: alerts
//!     url_pattern: pushstream.example.com
//!     message_types: [alert_fired]
//!   - name: quotes
//!     url_pattern: data.example.com/socket
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// One relay feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRule {
    /// Feed name; becomes the push event name.
    #[serde(default)]
    pub name: String,
    /// Substring matched against the socket URL.
    #[serde(default)]
    pub url_pattern: String,
    /// Allowed values of the payload's `m` field. Absent or empty accepts
    /// every frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_types: Option<Vec<String>>,
}

impl FeedRule {
    /// Whether this rule claims a socket opened on `url`.
    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.url_pattern)
    }
}

/// Ordered feed rules. The first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Feeds in priority order.
    #[serde(default)]
    pub feeds: Vec<FeedRule>,
}

impl RelayConfig {
    /// Read and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|source| RelayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, RelayError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Every feed needs a name and a URL pattern.
    pub fn validate(&self) -> Result<(), RelayError> {
        for (index, feed) in self.feeds.iter().enumerate() {
            if feed.name.is_empty() {
                return Err(RelayError::MissingName { index });
            }
            if feed.url_pattern.is_empty() {
                return Err(RelayError::MissingUrlPattern {
                    index,
                    name: feed.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feeds_in_order() {
        let config = RelayConfig::from_yaml(
            "feeds:\n  - name: alerts\n    url_pattern: pushstream\n    message_types: [alert_fired, alert_removed]\n  - name: all\n    url_pattern: socket\n",
        )
        .unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].name, "alerts");
        assert_eq!(
            config.feeds[0].message_types.as_deref(),
            Some(&["alert_fired".to_string(), "alert_removed".to_string()][..])
        );
        assert_eq!(config.feeds[1].message_types, None);
    }

    #[test]
    fn empty_document_has_no_feeds() {
        let config = RelayConfig::from_yaml("feeds: []\n").unwrap();
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn missing_name_rejected() {
        let err = RelayConfig::from_yaml("feeds:\n  - url_pattern: x\n").unwrap_err();
        assert!(matches!(err, RelayError::MissingName { index: 0 }));
    }

    #[test]
    fn missing_pattern_rejected() {
        let err = RelayConfig::from_yaml("feeds:\n  - name: a\n    url_pattern: x\n  - name: b\n")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "relay config: feed[1] (b) missing url_pattern"
        );
    }

    #[test]
    fn malformed_yaml_rejected() {
        let err = RelayConfig::from_yaml("feeds: [unclosed").unwrap_err();
        assert!(matches!(err, RelayError::Yaml(_)));
    }

    #[test]
    fn load_missing_file() {
        let err = RelayConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, RelayError::Io { .. }));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, "feeds:\n  - name: a\n    url_pattern: x\n").unwrap();
        let config = RelayConfig::load(&path).unwrap();
        assert!(config.feeds[0].matches("wss://x.example"));
    }
}
