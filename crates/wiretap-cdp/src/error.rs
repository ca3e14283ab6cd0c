//! Protocol client errors.

use thiserror::Error;

/// Errors from browser discovery, the protocol socket and page attachment.
#[derive(Debug, Error)]
pub enum CdpError {
    /// The discovery endpoint could not be reached or returned garbage.
    #[error("discovery failed at {url}: {reason}")]
    Discovery {
        /// Endpoint URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The protocol socket could not be opened.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Socket URL.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// A command did not complete in time.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },

    /// The browser answered a command with an error.
    #[error("CDP error: {0}")]
    Cdp(String),

    /// The socket is gone.
    #[error("CDP connection closed")]
    Closed,

    /// No open page matched the tab filter.
    #[error("no tabs found matching filter {filter:?}")]
    NoMatchingTabs {
        /// The configured filter.
        filter: String,
    },
}
