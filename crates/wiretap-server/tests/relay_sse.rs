//! Relay stream against a live listener.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use wiretap_relay::{Broker, RelayEvent};
use wiretap_server::{PipelineCounters, ServerConfig, WiretapServer};

fn event(feed: &str, payload: &str) -> RelayEvent {
    RelayEvent {
        feed: feed.into(),
        payload: payload.into(),
    }
}

async fn wait_for_clients(broker: &Broker, count: usize) {
    for _ in 0..100 {
        if broker.client_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} relay clients, have {}", broker.client_count());
}

#[tokio::test]
async fn streams_filtered_frames_and_unsubscribes_on_disconnect() {
    let broker = Arc::new(Broker::new());
    let server = WiretapServer::new(
        ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
        },
        Arc::new(PipelineCounters::default()),
    )
    .with_relay(Arc::clone(&broker));
    let handle = server.start().await.unwrap();

    let resp = reqwest::get(format!("http://{}/relay/events?feeds=alerts", handle.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    wait_for_clients(&broker, 1).await;

    let _ = broker.publish(&event("quotes", r#"{"m":"qsd"}"#));
    let _ = broker.publish(&event("alerts", r#"{"m":"alert_fired","p":[1]}"#));
    let _ = broker.publish(&event("alerts", r#"{"m":"alert_cleared"}"#));

    let mut body = resp.bytes_stream();
    let mut text = String::new();
    while text.matches("\n\n").count() < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        text.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert_eq!(
        text,
        "event: alerts\ndata: {\"m\":\"alert_fired\",\"p\":[1]}\n\n\
         event: alerts\ndata: {\"m\":\"alert_cleared\"}\n\n"
    );

    // The server notices the disconnect on its next write.
    drop(body);
    for _ in 0..100 {
        if broker.client_count() == 0 {
            break;
        }
        let _ = broker.publish(&event("alerts", "{}"));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(broker.client_count(), 0);

    server.shutdown().shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle.task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn relay_disabled_is_not_found() {
    let server = WiretapServer::new(
        ServerConfig {
            bind_addr: "127.0.0.1:0".into(),
        },
        Arc::new(PipelineCounters::default()),
    );
    let handle = server.start().await.unwrap();
    let resp = reqwest::get(format!("http://{}/relay/events", handle.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    server.shutdown().shutdown();
}
