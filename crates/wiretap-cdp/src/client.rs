//! DevTools protocol client over `tokio-tungstenite`.
//!
//! One socket to the browser endpoint carries commands for every attached
//! page; page commands are addressed with a flat `sessionId`. A single
//! handler task owns the socket, matches responses to pending commands by
//! id and forwards events to a channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::error::CdpError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending command waiting for its response.
type PendingTx = oneshot::Sender<Result<Value, String>>;

/// Capacity of the event channel.
pub const EVENT_BUFFER: usize = 4096;

/// A protocol event as received.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Session the event belongs to; `None` for browser-level events.
    pub session_id: Option<String>,
    /// Method name.
    pub method: String,
    /// Event parameters.
    pub params: Value,
}

/// Internal command message.
struct CdpCommand {
    session_id: Option<String>,
    method: String,
    params: Value,
    response_tx: PendingTx,
}

/// Handle to one protocol connection.
pub struct CdpClient {
    cmd_tx: mpsc::Sender<CdpCommand>,
    command_timeout: Duration,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl CdpClient {
    /// Connect to `ws_url`. Events arrive on the returned receiver until
    /// the socket closes.
    pub async fn connect(
        ws_url: &str,
        command_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<RawEvent>), CdpError> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| CdpError::Connect {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(url = ws_url, "protocol socket connected");

        let (cmd_tx, cmd_rx) = mpsc::channel::<CdpCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<RawEvent>(EVENT_BUFFER);
        let handler = tokio::spawn(cdp_handler_loop(ws, cmd_rx, event_tx));

        Ok((
            Self {
                cmd_tx,
                command_timeout,
                handler: Mutex::new(Some(handler)),
            },
            event_rx,
        ))
    }

    /// Browser-level command.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_inner(None, method, params, self.command_timeout).await
    }

    /// Command addressed to an attached page session.
    pub async fn send_to_session(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        self.send_inner(Some(session_id), method, params, self.command_timeout)
            .await
    }

    /// Page command with an explicit timeout.
    pub async fn send_to_session_with_timeout(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        self.send_inner(Some(session_id), method, params, timeout)
            .await
    }

    async fn send_inner(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CdpCommand {
                session_id: session_id.map(str::to_string),
                method: method.into(),
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| CdpError::Closed)?;

        let result = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| CdpError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
                context: format!("CDP {method}"),
            })?
            .map_err(|_| CdpError::Closed)?;

        result.map_err(CdpError::Cdp)
    }

    /// Whether the handler task is still running.
    pub fn is_connected(&self) -> bool {
        self.handler
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Drop the socket. Pending and later commands fail with
    /// [`CdpError::Closed`].
    pub fn shutdown(&self) {
        if let Some(handler) = self.handler.lock().take() {
            handler.abort();
        }
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Socket handler loop.
///
/// Sends commands, routes responses back by id and forwards events.
async fn cdp_handler_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<CdpCommand>,
    event_tx: mpsc::Sender<RawEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let next_id = AtomicU64::new(1);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let mut msg = json!({
                    "id": id,
                    "method": cmd.method,
                    "params": cmd.params,
                });
                if let Some(session_id) = cmd.session_id {
                    msg["sessionId"] = Value::String(session_id);
                }
                let _ = pending.insert(id, cmd.response_tx);
                if ws_tx.send(Message::Text(msg.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(mut val): Result<Value, _> = serde_json::from_str(&text) else {
                    continue;
                };
                if let Some(id) = val.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending.remove(&id) {
                        if let Some(err) = val.get("error") {
                            let msg = err["message"].as_str().unwrap_or("CDP error");
                            let _ = tx.send(Err(msg.into()));
                        } else {
                            let _ = tx.send(Ok(val["result"].take()));
                        }
                    }
                } else if let Some(method) = val.get("method").and_then(Value::as_str) {
                    let event = RawEvent {
                        session_id: val.get("sessionId").and_then(Value::as_str).map(str::to_string),
                        method: method.to_string(),
                        params: val["params"].take(),
                    };
                    if event_tx.send(event).await.is_err() {
                        debug!("event receiver dropped");
                    }
                }
            }
        }
    }
    if !pending.is_empty() {
        warn!(pending = pending.len(), "protocol socket closed with commands in flight");
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    /// Serve one socket: answer `Echo` with its params, `Fail` with an
    /// error, ignore `Hang`, and emit one event after the first command.
    async fn fake_browser() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut sent_event = false;
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let cmd: Value = serde_json::from_str(&text).unwrap();
                let reply = match cmd["method"].as_str().unwrap() {
                    "Echo" => json!({"id": cmd["id"], "result": {
                        "params": cmd["params"],
                        "sessionId": cmd.get("sessionId"),
                    }}),
                    "Fail" => json!({"id": cmd["id"], "error": {"code": -32000, "message": "nope"}}),
                    _ => continue,
                };
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                if !sent_event {
                    sent_event = true;
                    let event = json!({
                        "method": "Network.loadingFinished",
                        "sessionId": "S1",
                        "params": {"requestId": "E1"}
                    });
                    ws.send(Message::Text(event.to_string().into())).await.unwrap();
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn command_roundtrip_with_session() {
        let url = fake_browser().await;
        let (client, mut events) = CdpClient::connect(&url, Duration::from_secs(5)).await.unwrap();
        assert!(client.is_connected());

        let result = client
            .send_to_session("S1", "Echo", json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(result["params"]["a"], 1);
        assert_eq!(result["sessionId"], "S1");

        let event = events.recv().await.unwrap();
        assert_eq!(event.method, "Network.loadingFinished");
        assert_eq!(event.session_id.as_deref(), Some("S1"));
        assert_eq!(event.params["requestId"], "E1");

        let result = client.send("Echo", json!({})).await.unwrap();
        assert!(result["sessionId"].is_null());
    }

    #[tokio::test]
    async fn error_response_is_cdp_error() {
        let url = fake_browser().await;
        let (client, _events) = CdpClient::connect(&url, Duration::from_secs(5)).await.unwrap();
        let err = client.send("Fail", json!({})).await.unwrap_err();
        assert!(matches!(err, CdpError::Cdp(ref m) if m == "nope"));
    }

    #[tokio::test]
    async fn unanswered_command_times_out() {
        let url = fake_browser().await;
        let (client, _events) = CdpClient::connect(&url, Duration::from_secs(5)).await.unwrap();
        let err = client
            .send_to_session_with_timeout("S1", "Hang", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::Timeout { timeout_ms: 50, .. }));
    }

    #[tokio::test]
    async fn shutdown_fails_later_commands() {
        let url = fake_browser().await;
        let (client, _events) = CdpClient::connect(&url, Duration::from_secs(5)).await.unwrap();
        client.shutdown();
        tokio::task::yield_now().await;
        let err = client.send("Echo", json!({})).await.unwrap_err();
        assert!(matches!(err, CdpError::Closed));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn connect_failure() {
        let err = CdpClient::connect("ws://127.0.0.1:1/devtools", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CdpError::Connect { .. }));
    }
}
