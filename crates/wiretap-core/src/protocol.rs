//! Typed DevTools protocol events.
//!
//! Only the events the capture pipeline consumes are modeled. Raw
//! `(method, params)` pairs from the socket are decoded into [`CdpEvent`]
//! at the dispatch boundary; nothing downstream sees untyped JSON.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Header map as sent by the protocol.
pub type RawHeaders = Map<String, Value>;

/// Keep only string-valued headers.
pub fn string_headers(headers: &RawHeaders) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

/// One entry of a request's POST body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostDataEntry {
    /// Base64-encoded bytes.
    #[serde(default)]
    pub bytes: Option<String>,
}

/// Request details carried by `Network.requestWillBeSent`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Request URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Request headers.
    #[serde(default)]
    pub headers: RawHeaders,
    /// Body entries.
    #[serde(default)]
    pub post_data_entries: Vec<PostDataEntry>,
}

/// `Network.requestWillBeSent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    /// Exchange id.
    pub request_id: String,
    /// The request.
    pub request: Request,
    /// Resource type, when known.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
}

/// Response details carried by `Network.responseReceived`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Response URL.
    #[serde(default)]
    pub url: String,
    /// Status code.
    pub status: u16,
    /// Status text.
    #[serde(default)]
    pub status_text: String,
    /// Response headers.
    #[serde(default)]
    pub headers: RawHeaders,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
}

/// `Network.responseReceived`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    /// Exchange id.
    pub request_id: String,
    /// Resource type.
    #[serde(default, rename = "type")]
    pub resource_type: String,
    /// The response.
    pub response: Response,
}

/// `Network.loadingFinished`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    /// Exchange id.
    pub request_id: String,
    /// Bytes received on the wire.
    #[serde(default)]
    pub encoded_data_length: f64,
}

/// `Network.loadingFailed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    /// Exchange id.
    pub request_id: String,
    /// Failure description.
    #[serde(default)]
    pub error_text: String,
    /// Whether the request was canceled.
    #[serde(default)]
    pub canceled: bool,
}

/// `Network.webSocketCreated`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketCreated {
    /// Socket id.
    pub request_id: String,
    /// Socket URL.
    pub url: String,
}

/// A frame carried by the frame events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketFrame {
    /// Frame opcode.
    pub opcode: f64,
    /// Whether the frame was masked.
    #[serde(default)]
    pub mask: bool,
    /// Payload (text, or base64 for binary frames).
    #[serde(default)]
    pub payload_data: String,
}

/// `Network.webSocketFrameReceived` and `Network.webSocketFrameSent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketFrameEvent {
    /// Socket id.
    pub request_id: String,
    /// The frame.
    pub response: WebSocketFrame,
}

/// `Network.webSocketClosed`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    /// Socket id.
    pub request_id: String,
}

/// Frame descriptor carried by `Page.frameNavigated`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Frame id.
    pub id: String,
    /// Parent frame id; absent for the top-level frame.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Frame URL.
    pub url: String,
}

/// `Page.frameNavigated`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameNavigated {
    /// The navigated frame.
    pub frame: Frame,
}

/// `Page.navigatedWithinDocument`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocument {
    /// Frame id.
    pub frame_id: String,
    /// New URL.
    pub url: String,
}

/// `Target.detachedFromTarget`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTarget {
    /// Session that was detached.
    pub session_id: String,
    /// Target the session belonged to.
    #[serde(default)]
    pub target_id: Option<String>,
}

/// Every protocol event the pipeline reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum CdpEvent {
    /// `Network.requestWillBeSent`
    RequestWillBeSent(RequestWillBeSent),
    /// `Network.responseReceived`
    ResponseReceived(ResponseReceived),
    /// `Network.loadingFinished`
    LoadingFinished(LoadingFinished),
    /// `Network.loadingFailed`
    LoadingFailed(LoadingFailed),
    /// `Network.webSocketCreated`
    WebSocketCreated(WebSocketCreated),
    /// `Network.webSocketFrameReceived`
    WebSocketFrameReceived(WebSocketFrameEvent),
    /// `Network.webSocketFrameSent`
    WebSocketFrameSent(WebSocketFrameEvent),
    /// `Network.webSocketClosed`
    WebSocketClosed(WebSocketClosed),
    /// `Page.frameNavigated`
    FrameNavigated(FrameNavigated),
    /// `Page.navigatedWithinDocument`
    NavigatedWithinDocument(NavigatedWithinDocument),
    /// `Target.detachedFromTarget`
    DetachedFromTarget(DetachedFromTarget),
}

impl CdpEvent {
    /// Decode a protocol event.
    ///
    /// Returns `Ok(None)` for methods the pipeline does not consume.
    pub fn decode(method: &str, params: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match method {
            "Network.requestWillBeSent" => Self::RequestWillBeSent(serde_json::from_value(params)?),
            "Network.responseReceived" => Self::ResponseReceived(serde_json::from_value(params)?),
            "Network.loadingFinished" => Self::LoadingFinished(serde_json::from_value(params)?),
            "Network.loadingFailed" => Self::LoadingFailed(serde_json::from_value(params)?),
            "Network.webSocketCreated" => Self::WebSocketCreated(serde_json::from_value(params)?),
            "Network.webSocketFrameReceived" => {
                Self::WebSocketFrameReceived(serde_json::from_value(params)?)
            }
            "Network.webSocketFrameSent" => {
                Self::WebSocketFrameSent(serde_json::from_value(params)?)
            }
            "Network.webSocketClosed" => Self::WebSocketClosed(serde_json::from_value(params)?),
            "Page.frameNavigated" => Self::FrameNavigated(serde_json::from_value(params)?),
            "Page.navigatedWithinDocument" => {
                Self::NavigatedWithinDocument(serde_json::from_value(params)?)
            }
            "Target.detachedFromTarget" => {
                Self::DetachedFromTarget(serde_json::from_value(params)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Protocol method name.
    pub fn method(&self) -> &'static str {
        match self {
            Self::RequestWillBeSent(_) => "Network.requestWillBeSent",
            Self::ResponseReceived(_) => "Network.responseReceived",
            Self::LoadingFinished(_) => "Network.loadingFinished",
            Self::LoadingFailed(_) => "Network.loadingFailed",
            Self::WebSocketCreated(_) => "Network.webSocketCreated",
            Self::WebSocketFrameReceived(_) => "Network.webSocketFrameReceived",
            Self::WebSocketFrameSent(_) => "Network.webSocketFrameSent",
            Self::WebSocketClosed(_) => "Network.webSocketClosed",
            Self::FrameNavigated(_) => "Page.frameNavigated",
            Self::NavigatedWithinDocument(_) => "Page.navigatedWithinDocument",
            Self::DetachedFromTarget(_) => "Target.detachedFromTarget",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_request_will_be_sent() {
        let params = json!({
            "requestId": "E1",
            "loaderId": "L1",
            "request": {
                "url": "https://x.com/api",
                "method": "POST",
                "headers": {"Content-Type": "application/json"},
                "postDataEntries": [{"bytes": "aGVsbG8="}]
            },
            "type": "XHR",
            "timestamp": 1.5
        });
        let Some(CdpEvent::RequestWillBeSent(ev)) =
            CdpEvent::decode("Network.requestWillBeSent", params).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(ev.request_id, "E1");
        assert_eq!(ev.request.method, "POST");
        assert_eq!(ev.request.post_data_entries.len(), 1);
        assert_eq!(ev.resource_type.as_deref(), Some("XHR"));
    }

    #[test]
    fn decode_response_received() {
        let params = json!({
            "requestId": "E1",
            "type": "Script",
            "response": {"url": "https://x.com/a.js", "status": 200, "statusText": "OK",
                         "headers": {"a": "b"}, "mimeType": "text/javascript"}
        });
        let Some(CdpEvent::ResponseReceived(ev)) =
            CdpEvent::decode("Network.responseReceived", params).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(ev.response.status, 200);
        assert_eq!(ev.resource_type, "Script");
    }

    #[test]
    fn decode_frame_events() {
        let params = json!({
            "requestId": "W1",
            "timestamp": 2.0,
            "response": {"opcode": 1, "mask": false, "payloadData": "{\"m\":\"x\"}"}
        });
        let received = CdpEvent::decode("Network.webSocketFrameReceived", params.clone())
            .unwrap()
            .unwrap();
        assert_eq!(received.method(), "Network.webSocketFrameReceived");
        let sent = CdpEvent::decode("Network.webSocketFrameSent", params)
            .unwrap()
            .unwrap();
        let CdpEvent::WebSocketFrameSent(frame) = sent else {
            panic!("wrong variant");
        };
        assert!((frame.response.opcode - 1.0).abs() < f64::EPSILON);
        assert_eq!(frame.response.payload_data, "{\"m\":\"x\"}");
    }

    #[test]
    fn decode_frame_navigated_top_level() {
        let params = json!({"frame": {"id": "F1", "url": "https://x.com/chart/", "loaderId": "L"}});
        let Some(CdpEvent::FrameNavigated(ev)) =
            CdpEvent::decode("Page.frameNavigated", params).unwrap()
        else {
            panic!("wrong variant");
        };
        assert!(ev.frame.parent_id.is_none());
    }

    #[test]
    fn unknown_method_is_none() {
        assert!(
            CdpEvent::decode("Network.dataReceived", json!({}))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn malformed_params_is_error() {
        assert!(CdpEvent::decode("Network.loadingFinished", json!({"nope": 1})).is_err());
    }

    #[test]
    fn string_headers_drops_non_strings() {
        let headers = json!({"a": "1", "b": 2, "c": null, "d": "x"});
        let map = string_headers(headers.as_object().unwrap());
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "1");
        assert_eq!(map["d"], "x");
    }
}
