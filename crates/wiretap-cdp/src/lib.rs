//! # wiretap-cdp
//!
//! Connection to a browser's remote debugging endpoint.
//!
//! - [`targets`]: HTTP discovery of the browser socket and open pages
//! - [`client::CdpClient`]: command/response multiplexing over one
//!   `WebSocket`, with flat-session addressing and an event stream
//! - [`dispatcher::EventDispatcher`]: attaches to matching pages and routes
//!   their events to the capture and relay components

#![deny(unsafe_code)]

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod targets;

pub use client::{CdpClient, RawEvent};
pub use dispatcher::{CaptureSinks, DispatcherConfig, EventDispatcher, PageBodyFetcher};
pub use error::CdpError;
pub use targets::{BrowserVersion, TargetDiscovery, TargetInfo, matches_filter};
