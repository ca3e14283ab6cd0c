//! Frame routing from browser sockets to relay feeds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};
use wiretap_core::protocol::{WebSocketClosed, WebSocketCreated, WebSocketFrameEvent};

use crate::broker::{Broker, RelayEvent};
use crate::config::RelayConfig;

/// Envelope marker of length-prefixed multiplexed frames: `~m~<len>~m~<body>`.
const ENVELOPE_MARKER: &str = "~m~";

#[derive(Debug, Clone)]
struct MatchedFeed {
    name: String,
    message_types: Option<HashSet<String>>,
}

impl MatchedFeed {
    fn accepts(&self, payload: &str) -> bool {
        match &self.message_types {
            None => true,
            Some(allowed) => extract_message_type(payload).is_some_and(|m| allowed.contains(&m)),
        }
    }
}

/// Matches sockets to feeds and republishes their incoming frames.
pub struct RelayEngine {
    config: RelayConfig,
    broker: Arc<Broker>,
    connections: Mutex<HashMap<String, MatchedFeed>>,
}

impl RelayEngine {
    /// Engine publishing to `broker`.
    pub fn new(config: RelayConfig, broker: Arc<Broker>) -> Self {
        info!(feeds = config.feeds.len(), "relay engine ready");
        Self {
            config,
            broker,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// `Network.webSocketCreated`: bind the socket to the first matching
    /// feed, if any. The binding holds until the socket closes.
    pub fn on_created(&self, event: &WebSocketCreated) {
        let Some(rule) = self.config.feeds.iter().find(|f| f.matches(&event.url)) else {
            return;
        };
        let matched = MatchedFeed {
            name: rule.name.clone(),
            message_types: rule
                .message_types
                .as_ref()
                .filter(|types| !types.is_empty())
                .map(|types| types.iter().cloned().collect()),
        };
        debug!(feed = %rule.name, url = %event.url, request_id = %event.request_id, "relay matched socket");
        let _ = self
            .connections
            .lock()
            .insert(event.request_id.clone(), matched);
    }

    /// `Network.webSocketFrameReceived`: publish when the bound feed
    /// accepts the payload. Returns whether the frame was published.
    pub fn on_frame_received(&self, event: &WebSocketFrameEvent) -> bool {
        let Some(feed) = self.connections.lock().get(&event.request_id).cloned() else {
            return false;
        };
        let payload = &event.response.payload_data;
        if payload.is_empty() || !feed.accepts(payload) {
            return false;
        }
        let _ = self.broker.publish(&RelayEvent {
            feed: feed.name,
            payload: payload.clone(),
        });
        true
    }

    /// `Network.webSocketClosed`: forget the binding.
    pub fn on_closed(&self, event: &WebSocketClosed) {
        let _ = self.connections.lock().remove(&event.request_id);
    }

    /// Sockets currently bound to a feed.
    pub fn tracked_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Configured feed count.
    pub fn feed_count(&self) -> usize {
        self.config.feeds.len()
    }
}

#[derive(Deserialize)]
struct Discriminator {
    #[serde(default)]
    m: String,
}

/// The `m` field of a JSON object payload, unwrapping an optional
/// `~m~<len>~m~` envelope first.
///
/// Returns `None` for non-object, unparseable or `m`-less payloads.
pub fn extract_message_type(payload: &str) -> Option<String> {
    let mut body = payload;
    if let Some(rest) = body.strip_prefix(ENVELOPE_MARKER) {
        if let Some(idx) = rest.find(ENVELOPE_MARKER) {
            body = &rest[idx + ENVELOPE_MARKER.len()..];
        }
    }
    let body = body.trim();
    if !body.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Discriminator>(body)
        .ok()
        .map(|d| d.m)
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use wiretap_core::protocol::WebSocketFrame;

    use super::*;
    use crate::config::FeedRule;

    fn rule(name: &str, pattern: &str, types: Option<&[&str]>) -> FeedRule {
        FeedRule {
            name: name.into(),
            url_pattern: pattern.into(),
            message_types: types.map(|t| t.iter().map(|s| (*s).to_string()).collect()),
        }
    }

    fn engine(feeds: Vec<FeedRule>) -> (Arc<Broker>, RelayEngine) {
        let broker = Arc::new(Broker::new());
        let engine = RelayEngine::new(RelayConfig { feeds }, Arc::clone(&broker));
        (broker, engine)
    }

    fn created(id: &str, url: &str) -> WebSocketCreated {
        WebSocketCreated {
            request_id: id.into(),
            url: url.into(),
        }
    }

    fn frame(id: &str, payload: &str) -> WebSocketFrameEvent {
        WebSocketFrameEvent {
            request_id: id.into(),
            response: WebSocketFrame {
                opcode: 1.0,
                mask: false,
                payload_data: payload.into(),
            },
        }
    }

    #[test]
    fn extract_plain_json() {
        assert_eq!(
            extract_message_type(r#"{"m":"alert_fired","alert_id":1}"#).as_deref(),
            Some("alert_fired")
        );
    }

    #[test]
    fn extract_from_envelope() {
        assert_eq!(
            extract_message_type(r#"~m~23~m~{"m":"alert_fired","x":1}"#).as_deref(),
            Some("alert_fired")
        );
    }

    #[test]
    fn extract_rejects_non_objects() {
        assert_eq!(extract_message_type("~h~12"), None);
        assert_eq!(extract_message_type("~m~4~m~~h~1"), None);
        assert_eq!(extract_message_type("[1,2]"), None);
        assert_eq!(extract_message_type("{broken"), None);
        assert_eq!(extract_message_type(r#"{"p":1}"#), None);
        assert_eq!(extract_message_type(r#"{"m":7}"#), None);
        assert_eq!(extract_message_type(""), None);
    }

    #[tokio::test]
    async fn filtered_feed_publishes_allowed_types_only() {
        let (broker, engine) = engine(vec![rule("alerts", "pushstream", Some(&["alert_fired"]))]);
        let (_, mut rx) = broker.subscribe();
        engine.on_created(&created("W1", "wss://pushstream.example.com/x"));

        assert!(engine.on_frame_received(&frame("W1", r#"{"m":"alert_fired","alert_id":1}"#)));
        assert!(!engine.on_frame_received(&frame("W1", r#"{"m":"other"}"#)));
        assert!(engine.on_frame_received(&frame("W1", r#"~m~23~m~{"m":"alert_fired","x":1}"#)));
        assert!(!engine.on_frame_received(&frame("W1", "not json")));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.feed, "alerts");
        assert_eq!(first.payload, r#"{"m":"alert_fired","alert_id":1}"#);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload, r#"~m~23~m~{"m":"alert_fired","x":1}"#);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unfiltered_feed_publishes_everything() {
        let (broker, engine) = engine(vec![rule("raw", "socket", None)]);
        let (_, mut rx) = broker.subscribe();
        engine.on_created(&created("W1", "wss://data.example.com/socket"));
        assert!(engine.on_frame_received(&frame("W1", "~h~1")));
        assert!(!engine.on_frame_received(&frame("W1", "")));
        assert_eq!(rx.recv().await.unwrap().payload, "~h~1");
    }

    #[test]
    fn empty_type_list_means_unfiltered() {
        let (_broker, engine) = engine(vec![rule("raw", "socket", Some(&[]))]);
        engine.on_created(&created("W1", "wss://socket"));
        assert!(engine.on_frame_received(&frame("W1", "anything")));
    }

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let (broker, engine) = engine(vec![
            rule("first", "example.com", None),
            rule("second", "example.com/socket", None),
        ]);
        let (_, mut rx) = broker.subscribe();
        engine.on_created(&created("W1", "wss://example.com/socket"));
        assert!(engine.on_frame_received(&frame("W1", "x")));
        assert_eq!(rx.recv().await.unwrap().feed, "first");
    }

    #[test]
    fn unmatched_and_closed_sockets_publish_nothing() {
        let (_broker, engine) = engine(vec![rule("a", "pushstream", None)]);
        engine.on_created(&created("W1", "wss://elsewhere"));
        assert_eq!(engine.tracked_connections(), 0);
        assert!(!engine.on_frame_received(&frame("W1", "x")));

        engine.on_created(&created("W2", "wss://pushstream"));
        assert_eq!(engine.tracked_connections(), 1);
        engine.on_closed(&WebSocketClosed {
            request_id: "W2".into(),
        });
        assert_eq!(engine.tracked_connections(), 0);
        assert!(!engine.on_frame_received(&frame("W2", "x")));
    }
}
