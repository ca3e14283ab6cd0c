//! Metric names shared across the pipeline.
//!
//! Counters and gauges are emitted through the `metrics` facade by the crate
//! that owns the event; the server installs the Prometheus recorder.

/// Records appended to a JSONL file.
pub const RECORDS_WRITTEN_TOTAL: &str = "capture_records_written_total";
/// Records dropped before reaching disk. Label `reason`:
/// `queue_full`, `closed` or `close_timeout`.
pub const RECORDS_DROPPED_TOTAL: &str = "capture_records_dropped_total";
/// Pending HTTP exchanges evicted by the staleness sweep.
pub const PENDING_EVICTED_TOTAL: &str = "capture_pending_evicted_total";
/// Pending HTTP exchanges currently tracked (gauge).
pub const PENDING_EXCHANGES: &str = "capture_pending_exchanges";
/// Relay events delivered to a subscriber buffer.
pub const RELAY_EVENTS_PUBLISHED_TOTAL: &str = "relay_events_published_total";
/// Relay events dropped because a subscriber buffer was full.
pub const RELAY_EVENTS_DROPPED_TOTAL: &str = "relay_events_dropped_total";
/// Relay subscribers currently connected (gauge).
pub const RELAY_SUBSCRIBERS_ACTIVE: &str = "relay_subscribers_active";
