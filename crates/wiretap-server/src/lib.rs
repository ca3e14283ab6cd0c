//! # wiretap-server
//!
//! Axum HTTP server for a running capture.
//!
//! - `GET /health`: uptime and pipeline counters
//! - `GET /metrics`: Prometheus exposition, when a recorder is installed
//! - `GET /relay/events`: live relay as server-sent events, when the relay
//!   is enabled
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod relay_stream;
pub mod server;
pub mod shutdown;

pub use errors::ServerError;
pub use health::{HealthResponse, PipelineCounters, StatusProbe};
pub use server::{AppState, ServerConfig, ServerHandle, WiretapServer};
pub use shutdown::ShutdownCoordinator;
