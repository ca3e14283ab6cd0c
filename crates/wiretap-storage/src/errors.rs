//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// File-system failure on a specific path.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The writer queue is full; the record was dropped.
    #[error("write queue full for {stream}")]
    QueueFull {
        /// Stream description (`route/kind/identity`).
        stream: String,
    },
    /// The writer has been closed.
    #[error("writer closed for {stream}")]
    Closed {
        /// Stream description (`route/kind/identity`).
        stream: String,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
