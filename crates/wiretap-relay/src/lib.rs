//! # wiretap-relay
//!
//! Republishes selected browser `WebSocket` frames to in-process
//! subscribers.
//!
//! The [`RelayEngine`] matches each socket against an ordered list of
//! [`FeedRule`]s when it opens, then forwards frames from matched sockets
//! to the [`Broker`]. The broker never blocks a publisher: a subscriber
//! whose buffer is full misses the event.

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod engine;
pub mod errors;

pub use broker::{Broker, RelayEvent, SUBSCRIBER_BUFFER, Subscription};
pub use config::{FeedRule, RelayConfig};
pub use engine::{RelayEngine, extract_message_type};
pub use errors::RelayError;
