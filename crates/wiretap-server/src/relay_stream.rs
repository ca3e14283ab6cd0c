//! `GET /relay/events`: the live relay as server-sent events.
//!
//! Each connection holds one broker [`Subscription`]. Events are written as
//! `event: <feed>` / `data: <payload>` frames in publish order. The
//! subscription is dropped, and so removed from the broker, when the client
//! disconnects.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONNECTION};
use axum::http::{HeaderName, HeaderValue};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures::Stream;
use serde::Deserialize;
use tracing::{debug, info};
use wiretap_relay::{Broker, RelayEvent, Subscription};

/// Path of the relay stream.
pub const RELAY_EVENTS_PATH: &str = "/relay/events";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Query string of the relay stream.
#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    /// Comma-separated feed allow-list.
    pub feeds: Option<String>,
}

/// Feed allow-list. Empty allows every feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter(HashSet<String>);

impl FeedFilter {
    /// Parse a comma-separated list, ignoring blanks.
    pub fn parse(raw: Option<&str>) -> Self {
        Self(
            raw.unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Whether events of `feed` pass.
    pub fn allows(&self, feed: &str) -> bool {
        self.0.is_empty() || self.0.contains(feed)
    }
}

/// Router exposing [`RELAY_EVENTS_PATH`] over `broker`.
pub fn relay_routes<S>(broker: Arc<Broker>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route(RELAY_EVENTS_PATH, get(relay_events))
        .with_state(broker)
}

async fn relay_events(
    State(broker): State<Arc<Broker>>,
    Query(query): Query<RelayQuery>,
) -> impl IntoResponse {
    let filter = FeedFilter::parse(query.feeds.as_deref());
    let subscription = broker.subscription();
    info!(
        subscriber = subscription.id(),
        feeds = query.feeds.as_deref().unwrap_or("*"),
        "relay client connected"
    );

    let headers = [
        (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (CONNECTION, HeaderValue::from_static("keep-alive")),
        (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
    ];
    let sse = Sse::new(event_stream(subscription, filter)).keep_alive(KeepAlive::default());
    (headers, sse)
}

fn event_stream(
    mut subscription: Subscription,
    filter: FeedFilter,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            if filter.allows(&event.feed) {
                yield Ok(to_sse(&event));
            }
        }
        debug!(subscriber = subscription.id(), "relay subscription closed");
    }
}

/// SSE frame for one relayed event.
///
/// Line breaks cannot appear in the event name and carriage returns cannot
/// appear in data, so both are stripped.
pub fn to_sse(event: &RelayEvent) -> Event {
    let feed: String = event
        .feed
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect();
    Event::default()
        .event(feed)
        .data(event.payload.replace('\r', ""))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    use super::*;

    fn relay(feed: &str, payload: &str) -> RelayEvent {
        RelayEvent {
            feed: feed.into(),
            payload: payload.into(),
        }
    }

    #[test]
    fn filter_parsing() {
        let filter = FeedFilter::parse(Some(" alerts, ,quotes,"));
        assert!(filter.allows("alerts"));
        assert!(filter.allows("quotes"));
        assert!(!filter.allows("trades"));

        assert!(FeedFilter::parse(None).allows("anything"));
        assert!(FeedFilter::parse(Some("")).allows("anything"));
        assert!(FeedFilter::parse(Some(" , ")).allows("anything"));
    }

    #[tokio::test]
    async fn stream_applies_filter_in_order() {
        let broker = Arc::new(Broker::new());
        let subscription = broker.subscription();
        let mut stream = Box::pin(event_stream(subscription, FeedFilter::parse(Some("a"))));

        let _ = broker.publish(&relay("a", "1"));
        let _ = broker.publish(&relay("b", "2"));
        let _ = broker.publish(&relay("a", "3"));

        let first = format!("{:?}", stream.next().await.unwrap().unwrap());
        let second = format!("{:?}", stream.next().await.unwrap().unwrap());
        assert!(first.contains("data: 1"));
        assert!(second.contains("data: 3"));
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let broker = Arc::new(Broker::new());
        let stream = event_stream(broker.subscription(), FeedFilter::default());
        assert_eq!(broker.client_count(), 1);
        drop(stream);
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn response_headers() {
        let broker = Arc::new(Broker::new());
        let app: Router = relay_routes(Arc::clone(&broker));
        let req = Request::builder()
            .uri("/relay/events?feeds=alerts")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(broker.client_count(), 1);
        drop(resp);
        assert_eq!(broker.client_count(), 0);
    }
}
