//! End-to-end: protocol events in, one JSON line out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use wiretap_capture::{
    BodyFetcher, CaptureError, ConnectionRegistry, HttpCaptureConfig, HttpCorrelator,
};
use wiretap_core::{CdpEvent, sha256_hex};
use wiretap_storage::{ResourceWriter, RotationPolicy, WriterRegistry};

struct Body(&'static [u8]);

#[async_trait]
impl BodyFetcher for Body {
    async fn fetch_body(&self, _request_id: &str) -> Result<Vec<u8>, CaptureError> {
        Ok(self.0.to_vec())
    }
}

fn decode(method: &str, params: Value) -> CdpEvent {
    CdpEvent::decode(method, params).unwrap().unwrap()
}

#[tokio::test]
async fn truncated_exchange_lands_in_expected_file() {
    let dir = tempfile::tempdir().unwrap();
    let connections = Arc::new(ConnectionRegistry::new());
    let _ = connections.register("8F3A2B1C9D0E", "https://www.example.com/chart/xyz/");
    let writers = Arc::new(WriterRegistry::new(dir.path(), 16, RotationPolicy::default()));
    let http = HttpCorrelator::new(
        HttpCaptureConfig {
            max_body_bytes: 5,
            ..HttpCaptureConfig::default()
        },
        Arc::clone(&connections),
        Arc::clone(&writers),
        ResourceWriter::new(dir.path()),
    );

    let CdpEvent::RequestWillBeSent(sent) = decode(
        "Network.requestWillBeSent",
        json!({
            "requestId": "E1",
            "request": {"url": "https://www.example.com/api/quote", "method": "POST", "headers": {}},
            "type": "XHR"
        }),
    ) else {
        panic!("wrong variant");
    };
    let CdpEvent::ResponseReceived(received) = decode(
        "Network.responseReceived",
        json!({
            "requestId": "E1",
            "type": "XHR",
            "response": {"url": "https://www.example.com/api/quote", "status": 200, "statusText": "OK", "headers": {"content-type": "text/plain"}}
        }),
    ) else {
        panic!("wrong variant");
    };
    let CdpEvent::LoadingFinished(finished) = decode(
        "Network.loadingFinished",
        json!({"requestId": "E1", "encodedDataLength": 10}),
    ) else {
        panic!("wrong variant");
    };

    http.on_request_will_be_sent("8F3A2B1C9D0E", &sent);
    http.on_response_received(&received);
    let fetcher: Arc<dyn BodyFetcher> = Arc::new(Body(b"0123456789"));
    http.on_loading_finished("8F3A2B1C9D0E", &finished, Some(fetcher))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(writers.close_all().await, 0);

    let path = dir
        .path()
        .join(Utc::now().format("%Y-%m-%d").to_string())
        .join("chart_xyz")
        .join("http")
        .join("8F3A2B1C.jsonl");
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let record: Value = serde_json::from_str(lines[0]).unwrap();
    let response = &record["response"];
    assert_eq!(response["truncated"], true);
    assert_eq!(response["original_size"], 10);
    assert_eq!(response["body"], "01234");
    assert_eq!(response["sha256"], sha256_hex(b"0123456789"));
    assert_eq!(response["headers"]["content-type"], "text/plain");
    assert_eq!(record["method"], "POST");
}
