//! Relay error types.

use std::path::PathBuf;

use thiserror::Error;

/// Relay configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The config file could not be read.
    #[error("relay config: {}: {source}", path.display())]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The config is not valid YAML for the expected shape.
    #[error("relay config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A feed has no name.
    #[error("relay config: feed[{index}] missing name")]
    MissingName {
        /// Position in the feed list.
        index: usize,
    },
    /// A feed has no URL pattern.
    #[error("relay config: feed[{index}] ({name}) missing url_pattern")]
    MissingUrlPattern {
        /// Position in the feed list.
        index: usize,
        /// Feed name.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages() {
        assert_eq!(
            RelayError::MissingName { index: 2 }.to_string(),
            "relay config: feed[2] missing name"
        );
        assert_eq!(
            RelayError::MissingUrlPattern {
                index: 0,
                name: "alerts".into()
            }
            .to_string(),
            "relay config: feed[0] (alerts) missing url_pattern"
        );
    }
}
