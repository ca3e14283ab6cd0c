//! `WebSocket` lifecycle and frame capture.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use wiretap_core::protocol::{WebSocketClosed, WebSocketCreated, WebSocketFrameEvent};
use wiretap_core::{
    ConnectionRoute, Direction, RecordKind, WebSocketCapture, WsEventKind, truncate,
};
use wiretap_storage::WriterRegistry;

use crate::connections::ConnectionRegistry;

#[derive(Debug, Clone)]
struct OpenSocket {
    url: String,
    route: ConnectionRoute,
}

/// Tags socket events with their owning connection and persists them.
///
/// When disabled every handler returns immediately and no socket is
/// tracked.
pub struct WebSocketCorrelator {
    enabled: bool,
    max_frame_bytes: usize,
    connections: Arc<ConnectionRegistry>,
    writers: Arc<WriterRegistry>,
    sockets: Mutex<HashMap<String, OpenSocket>>,
}

impl WebSocketCorrelator {
    /// New correlator. `max_frame_bytes == 0` disables payload truncation.
    pub fn new(
        enabled: bool,
        max_frame_bytes: usize,
        connections: Arc<ConnectionRegistry>,
        writers: Arc<WriterRegistry>,
    ) -> Self {
        Self {
            enabled,
            max_frame_bytes,
            connections,
            writers,
            sockets: Mutex::new(HashMap::new()),
        }
    }

    /// `Network.webSocketCreated`
    pub fn on_created(&self, target_id: &str, event: &WebSocketCreated) {
        if !self.enabled {
            return;
        }
        let socket = OpenSocket {
            url: event.url.clone(),
            route: self.connections.resolve(target_id),
        };
        let record = WebSocketCapture::new(
            WsEventKind::Created,
            &event.request_id,
            target_id,
            &event.url,
        );
        self.emit(&socket.route, record);
        let _ = self.sockets.lock().insert(event.request_id.clone(), socket);
    }

    /// `Network.webSocketFrameReceived`
    pub fn on_frame_received(&self, target_id: &str, event: &WebSocketFrameEvent) {
        self.on_frame(target_id, event, WsEventKind::FrameReceived, Direction::Incoming);
    }

    /// `Network.webSocketFrameSent`
    pub fn on_frame_sent(&self, target_id: &str, event: &WebSocketFrameEvent) {
        self.on_frame(target_id, event, WsEventKind::FrameSent, Direction::Outgoing);
    }

    fn on_frame(
        &self,
        target_id: &str,
        event: &WebSocketFrameEvent,
        kind: WsEventKind,
        direction: Direction,
    ) {
        if !self.enabled {
            return;
        }
        let Some(socket) = self.sockets.lock().get(&event.request_id).cloned() else {
            debug!(request_id = %event.request_id, "frame for untracked socket");
            return;
        };

        let bounded = truncate(event.response.payload_data.as_bytes(), self.max_frame_bytes);
        let mut record = WebSocketCapture::new(kind, &event.request_id, target_id, &socket.url);
        record.direction = Some(direction);
        record.opcode = Some(event.response.opcode as u8);
        if !bounded.data.is_empty() {
            record.payload_data = Some(String::from_utf8_lossy(bounded.data).into_owned());
        }
        if bounded.original_size > 0 {
            record.original_size = Some(bounded.original_size);
        }
        record.truncated = bounded.truncated;
        record.sha256 = bounded.sha256;
        self.emit(&socket.route, record);
    }

    /// `Network.webSocketClosed`
    pub fn on_closed(&self, target_id: &str, event: &WebSocketClosed) {
        if !self.enabled {
            return;
        }
        let Some(socket) = self.sockets.lock().remove(&event.request_id) else {
            return;
        };
        let record =
            WebSocketCapture::new(WsEventKind::Closed, &event.request_id, target_id, &socket.url);
        self.emit(&socket.route, record);
    }

    /// Sockets currently open.
    pub fn active_connections(&self) -> usize {
        self.sockets.lock().len()
    }

    fn emit(&self, route: &ConnectionRoute, record: WebSocketCapture) {
        let writer = self.writers.get_writer(
            &route.route_segment,
            RecordKind::WebSocket,
            &route.short_identity,
        );
        if let Err(e) = writer.submit(record.into()) {
            debug!(error = %e, "websocket record not queued");
        }
    }
}
