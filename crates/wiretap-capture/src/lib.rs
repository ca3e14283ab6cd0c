//! # wiretap-capture
//!
//! Turns protocol events into capture records.
//!
//! - [`ConnectionRegistry`] maps a browser target to its route and identity
//! - [`HttpCorrelator`] merges request, response and completion events into
//!   one record per exchange and fetches the body off the event path
//! - [`WebSocketCorrelator`] tags socket lifecycle events and frames with
//!   their owning connection
//!
//! Handlers never return errors to the dispatcher. Orphaned events are
//! ignored and write failures are logged where they happen.

#![deny(unsafe_code)]

pub mod connections;
pub mod errors;
pub mod http;
pub mod websocket;

pub use connections::ConnectionRegistry;
pub use errors::CaptureError;
pub use http::{BodyFetcher, HttpCaptureConfig, HttpCorrelator};
pub use websocket::WebSocketCorrelator;
