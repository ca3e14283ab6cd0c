//! In-process fan-out with per-subscriber bounded buffers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wiretap_core::metrics::{
    RELAY_EVENTS_DROPPED_TOTAL, RELAY_EVENTS_PUBLISHED_TOTAL, RELAY_SUBSCRIBERS_ACTIVE,
};

/// Buffer capacity of each subscriber.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Warn on the first dropped event and then once per this many.
const DROP_WARN_EVERY: u64 = 100;

/// A relayed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    /// Feed name.
    pub feed: String,
    /// Raw frame payload.
    pub payload: String,
}

/// Publish/subscribe hub.
///
/// Publishing never blocks: an event is dropped for any subscriber whose
/// buffer is full. Within one subscriber, events arrive in publish order.
#[derive(Debug)]
pub struct Broker {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<RelayEvent>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    capacity: usize,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// Broker with the default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_BUFFER)
    }

    /// Broker whose subscribers buffer `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<RelayEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.write();
        let _ = subscribers.insert(id, tx);
        metrics::gauge!(RELAY_SUBSCRIBERS_ACTIVE).set(subscribers.len() as f64);
        debug!(subscriber = id, "relay subscriber added");
        (id, rx)
    }

    /// Register a subscriber that unsubscribes itself when dropped.
    pub fn subscription(self: &Arc<Self>) -> Subscription {
        let (id, rx) = self.subscribe();
        Subscription {
            id,
            rx,
            broker: Arc::clone(self),
        }
    }

    /// Remove a subscriber. Its receiver sees the end of the stream once
    /// drained.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let removed = subscribers.remove(&id).is_some();
        metrics::gauge!(RELAY_SUBSCRIBERS_ACTIVE).set(subscribers.len() as f64);
        if removed {
            debug!(subscriber = id, "relay subscriber removed");
        }
        removed
    }

    /// Offer `event` to every subscriber. Returns how many accepted it.
    pub fn publish(&self, event: &RelayEvent) -> usize {
        let subscribers = self.subscribers.read();
        let mut delivered = 0;
        for (id, tx) in subscribers.iter() {
            if tx.try_send(event.clone()).is_ok() {
                delivered += 1;
                continue;
            }
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed);
            if dropped % DROP_WARN_EVERY == 0 {
                warn!(
                    subscriber = id,
                    feed = %event.feed,
                    dropped_total = dropped + 1,
                    "relay subscriber buffer full, dropping event"
                );
            }
        }
        let dropped = subscribers.len() - delivered;
        metrics::counter!(RELAY_EVENTS_PUBLISHED_TOTAL).increment(delivered as u64);
        if dropped > 0 {
            metrics::counter!(RELAY_EVENTS_DROPPED_TOTAL).increment(dropped as u64);
        }
        delivered
    }

    /// Subscribers currently registered.
    pub fn client_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Events dropped across all subscribers since the broker was created.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A broker subscription tied to its owner's lifetime.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<RelayEvent>,
    broker: Arc<Broker>,
}

impl Subscription {
    /// Subscriber id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.broker.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use parking_lot::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    /// Log sink that keeps formatted output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn event(feed: &str, payload: &str) -> RelayEvent {
        RelayEvent {
            feed: feed.into(),
            payload: payload.into(),
        }
    }

    #[test]
    fn count_tracks_subscriptions() {
        let broker = Broker::new();
        assert_eq!(broker.client_count(), 0);
        let (a, _rx_a) = broker.subscribe();
        let (b, _rx_b) = broker.subscribe();
        assert_ne!(a, b);
        assert_eq!(broker.client_count(), 2);
        assert!(broker.unsubscribe(a));
        assert!(!broker.unsubscribe(a));
        assert_eq!(broker.client_count(), 1);
        assert!(broker.unsubscribe(b));
        assert_eq!(broker.client_count(), 0);
    }

    #[tokio::test]
    async fn fifo_per_subscriber() {
        let broker = Broker::new();
        let (_, mut rx) = broker.subscribe();
        for i in 0..10 {
            assert_eq!(broker.publish(&event("f", &i.to_string())), 1);
        }
        for i in 0..10 {
            assert_eq!(rx.recv().await.unwrap().payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn full_subscriber_only_loses_its_copy() {
        let broker = Broker::with_capacity(2);
        let (_, mut slow) = broker.subscribe();
        let (_, mut fast) = broker.subscribe();

        assert_eq!(broker.publish(&event("f", "1")), 2);
        assert_eq!(broker.publish(&event("f", "2")), 2);
        assert_eq!(fast.recv().await.unwrap().payload, "1");
        assert_eq!(fast.recv().await.unwrap().payload, "2");

        // slow is full now
        assert_eq!(broker.publish(&event("f", "3")), 1);
        assert_eq!(fast.recv().await.unwrap().payload, "3");

        assert_eq!(slow.recv().await.unwrap().payload, "1");
        assert_eq!(slow.recv().await.unwrap().payload, "2");
        assert!(slow.try_recv().is_err());
    }

    #[test]
    fn dropped_events_are_counted_and_warned() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let broker = Broker::with_capacity(1);
        let (_, _rx) = broker.subscribe();

        tracing::subscriber::with_default(subscriber, || {
            assert_eq!(broker.publish(&event("alerts", "1")), 1);
            assert_eq!(broker.publish(&event("alerts", "2")), 0);
            assert_eq!(broker.publish(&event("alerts", "3")), 0);
        });

        assert_eq!(broker.dropped_count(), 2);
        let output = logs.contents();
        assert_eq!(output.matches("dropping event").count(), 1);
        assert!(output.contains("WARN"));
        assert!(output.contains("alerts"));
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let broker = Broker::new();
        let (id, mut rx) = broker.subscribe();
        let _ = broker.publish(&event("f", "last"));
        assert!(broker.unsubscribe(id));
        assert_eq!(rx.recv().await.unwrap().payload, "last");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn publish_without_subscribers() {
        let broker = Broker::new();
        assert_eq!(broker.publish(&event("f", "x")), 0);
    }

    #[tokio::test]
    async fn subscription_guard_unsubscribes_on_drop() {
        let broker = Arc::new(Broker::new());
        let mut sub = broker.subscription();
        assert_eq!(broker.client_count(), 1);
        let _ = broker.publish(&event("f", "x"));
        assert_eq!(sub.recv().await.unwrap().feed, "f");
        drop(sub);
        assert_eq!(broker.client_count(), 0);
    }
}
