//! Capture records.
//!
//! A record is built by a correlator, handed to a log writer and never
//! touched again. Field names are the on-disk JSON schema; optional fields
//! are omitted when empty.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// Which log stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// HTTP exchanges.
    Http,
    /// `WebSocket` lifecycle events and frames.
    #[serde(rename = "websocket")]
    WebSocket,
}

impl RecordKind {
    /// Directory name for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request half of an HTTP capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Request headers (string values only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Decoded POST body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
}

/// Response half of an HTTP capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Status text.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_text: String,
    /// Response headers (string values only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Body as text when it is valid UTF-8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Body as base64 when it is not valid UTF-8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
    /// Whether the body was cut to the size limit.
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
    /// Body size before truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
    /// SHA-256 of the full body when truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// One completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCapture {
    /// When the record was emitted.
    pub timestamp: DateTime<Utc>,
    /// Protocol request id.
    pub request_id: String,
    /// Full target id of the owning page.
    pub tab_id: String,
    /// Request URL.
    pub url: String,
    /// Request method.
    pub method: String,
    /// Request details.
    pub request: HttpRequest,
    /// Response details, absent when no response was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
}

/// `WebSocket` event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventKind {
    /// Socket opened.
    Created,
    /// Frame received from the server.
    FrameReceived,
    /// Frame sent by the page.
    FrameSent,
    /// Socket closed.
    Closed,
}

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server to page.
    Incoming,
    /// Page to server.
    Outgoing,
}

/// One `WebSocket` lifecycle event or frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketCapture {
    /// When the record was emitted.
    pub timestamp: DateTime<Utc>,
    /// Protocol request id of the socket.
    pub request_id: String,
    /// Full target id of the owning page.
    pub tab_id: String,
    /// Socket URL.
    pub url: String,
    /// Event kind.
    pub event_type: WsEventKind,
    /// Frame direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Frame opcode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opcode: Option<u8>,
    /// Frame payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_data: Option<String>,
    /// Close code, when the protocol reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_code: Option<u16>,
    /// Close reason, when the protocol reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    /// Whether the payload was cut to the size limit.
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
    /// Payload size before truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<usize>,
    /// SHA-256 of the full payload when truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl WebSocketCapture {
    /// A record with only the identifying fields set.
    pub fn new(
        event_type: WsEventKind,
        request_id: impl Into<String>,
        tab_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            tab_id: tab_id.into(),
            url: url.into(),
            event_type,
            direction: None,
            opcode: None,
            payload_data: None,
            close_code: None,
            close_reason: None,
            truncated: false,
            original_size: None,
            sha256: None,
        }
    }
}

/// Anything a log writer accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureRecord {
    /// HTTP exchange.
    Http(HttpCapture),
    /// `WebSocket` event.
    WebSocket(WebSocketCapture),
}

impl CaptureRecord {
    /// Stream this record belongs to.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Http(_) => RecordKind::Http,
            Self::WebSocket(_) => RecordKind::WebSocket,
        }
    }

    /// Protocol request id.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Http(r) => &r.request_id,
            Self::WebSocket(r) => &r.request_id,
        }
    }
}

impl From<HttpCapture> for CaptureRecord {
    fn from(record: HttpCapture) -> Self {
        Self::Http(record)
    }
}

impl From<WebSocketCapture> for CaptureRecord {
    fn from(record: WebSocketCapture) -> Self {
        Self::WebSocket(record)
    }
}
