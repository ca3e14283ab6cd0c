//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Live pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    /// Pages the dispatcher is attached to.
    pub attached_pages: usize,
    /// HTTP exchanges awaiting completion.
    pub pending_exchanges: usize,
    /// Open `WebSocket` connections seen on attached pages.
    pub active_websockets: usize,
    /// Relay stream subscribers.
    pub relay_subscribers: usize,
}

/// Source of [`PipelineCounters`] for the health endpoint.
pub trait StatusProbe: Send + Sync {
    /// Current counters.
    fn counters(&self) -> PipelineCounters;
}

impl StatusProbe for PipelineCounters {
    fn counters(&self) -> PipelineCounters {
        *self
    }
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Whether at least one page is being captured.
    pub capturing: bool,
    /// Pipeline counters.
    #[serde(flatten)]
    pub pipeline: PipelineCounters,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, pipeline: PipelineCounters) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        capturing: pipeline.attached_pages > 0,
        pipeline,
    }
}
