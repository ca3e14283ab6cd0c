//! # wiretap-core
//!
//! Shared building blocks for the wiretap capture pipeline:
//!
//! - [`metrics`]: metric names emitted by the pipeline
//! - [`records`]: the immutable HTTP and `WebSocket` capture records that are
//!   persisted as JSON lines
//! - [`protocol`]: typed DevTools protocol events, decoded once at the
//!   dispatch boundary
//! - [`route`]: route-segment and short-identity derivation
//! - [`truncate`]: payload bounding with SHA-256 digests

#![deny(unsafe_code)]

pub mod metrics;
pub mod protocol;
pub mod records;
pub mod route;
pub mod truncate;

pub use protocol::CdpEvent;
pub use records::{
    CaptureRecord, Direction, HttpCapture, HttpRequest, HttpResponse, RecordKind,
    WebSocketCapture, WsEventKind,
};
pub use route::{ConnectionRoute, RouteError, UNKNOWN_ROUTE, derive_route, short_identity};
pub use truncate::{Truncated, sha256_hex, truncate};
