//! Capture error types.

use thiserror::Error;

/// Errors surfaced by capture collaborators.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The browser could not return a response body.
    #[error("body fetch failed for {request_id}: {message}")]
    BodyFetch {
        /// Exchange id.
        request_id: String,
        /// Failure description.
        message: String,
    },
    /// The body fetch did not finish in time.
    #[error("body fetch timed out after {timeout_ms}ms for {request_id}")]
    Timeout {
        /// Exchange id.
        request_id: String,
        /// Budget that elapsed.
        timeout_ms: u64,
    },
}
