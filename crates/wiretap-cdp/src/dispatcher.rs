//! Page attachment and event routing.
//!
//! The dispatcher connects to the browser endpoint, attaches to every open
//! page whose URL matches the tab filter and feeds each page's events to
//! the correlators. Route information is re-derived on full and
//! same-document navigations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wiretap_capture::{
    BodyFetcher, CaptureError, ConnectionRegistry, HttpCorrelator, WebSocketCorrelator,
};
use wiretap_core::protocol::DetachedFromTarget;
use wiretap_core::{CdpEvent, derive_route};
use wiretap_relay::RelayEngine;

use crate::client::{CdpClient, RawEvent};
use crate::error::CdpError;
use crate::targets::{TargetDiscovery, TargetInfo, matches_filter};

/// Budget for the optional reload after attaching.
pub const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for detaching at shutdown.
const DETACH_TIMEOUT: Duration = Duration::from_secs(2);

/// Attachment behavior.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Case-insensitive URL substring; empty matches every page.
    pub tab_url_filter: String,
    /// Reload each page after attaching so early traffic is seen.
    pub reload_on_attach: bool,
    /// Per-command timeout.
    pub command_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tab_url_filter: String::new(),
            reload_on_attach: true,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Components that receive page events.
#[derive(Clone)]
pub struct CaptureSinks {
    /// Target routes.
    pub connections: Arc<ConnectionRegistry>,
    /// HTTP correlation.
    pub http: Arc<HttpCorrelator>,
    /// `WebSocket` correlation.
    pub websocket: Arc<WebSocketCorrelator>,
    /// Live relay, when enabled.
    pub relay: Option<Arc<RelayEngine>>,
}

#[derive(Debug, Clone)]
struct AttachedPage {
    target_id: String,
}

type PageMap = Arc<RwLock<HashMap<String, AttachedPage>>>;

/// Fetches response bodies through one page session.
pub struct PageBodyFetcher {
    client: Arc<CdpClient>,
    session_id: String,
}

impl PageBodyFetcher {
    /// Fetcher bound to `session_id`.
    pub fn new(client: Arc<CdpClient>, session_id: impl Into<String>) -> Self {
        Self {
            client,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl BodyFetcher for PageBodyFetcher {
    async fn fetch_body(&self, request_id: &str) -> Result<Vec<u8>, CaptureError> {
        let fetch_err = |message: String| CaptureError::BodyFetch {
            request_id: request_id.to_string(),
            message,
        };
        let result = self
            .client
            .send_to_session(
                &self.session_id,
                "Network.getResponseBody",
                json!({ "requestId": request_id }),
            )
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        decode_body(&result).map_err(fetch_err)
    }
}

/// Body bytes from a `Network.getResponseBody` result.
fn decode_body(result: &Value) -> Result<Vec<u8>, String> {
    let body = result["body"].as_str().unwrap_or_default();
    if result["base64Encoded"].as_bool() == Some(true) {
        STANDARD.decode(body).map_err(|e| format!("invalid base64 body: {e}"))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

fn short_url(url: &str) -> &str {
    match url.char_indices().nth(120) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}

/// Owns the browser connection and the attached pages.
pub struct EventDispatcher {
    client: Arc<CdpClient>,
    connections: Arc<ConnectionRegistry>,
    pages: PageMap,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    /// Connect to the browser at `http_url` and attach to matching pages.
    ///
    /// Fails when the browser is unreachable or no page could be attached.
    /// A page that fails to attach is logged and skipped.
    pub async fn connect(
        http_url: &str,
        config: DispatcherConfig,
        sinks: CaptureSinks,
    ) -> Result<Self, CdpError> {
        info!(url = http_url, "connecting to browser");
        let discovery = TargetDiscovery::new(http_url);
        let version = discovery.version().await?;
        let (client, events) =
            CdpClient::connect(&version.web_socket_debugger_url, config.command_timeout).await?;
        let client = Arc::new(client);

        let pages: PageMap = Arc::new(RwLock::new(HashMap::new()));
        let router = EventRouter {
            client: Arc::clone(&client),
            sinks: sinks.clone(),
            pages: Arc::clone(&pages),
        };
        let pump = tokio::spawn(router.run(events));

        let dispatcher = Self {
            client,
            connections: sinks.connections,
            pages,
            pump: Mutex::new(Some(pump)),
        };

        let targets = discovery.list().await?;
        info!(count = targets.len(), browser = %version.browser, "found browser targets");

        let mut attached = 0;
        for target in targets.iter().filter(|t| t.is_page()) {
            if !matches_filter(&target.url, &config.tab_url_filter) {
                debug!(url = short_url(&target.url), "skipping tab (url filter)");
                continue;
            }
            match dispatcher.attach(target, &config).await {
                Ok(()) => attached += 1,
                Err(e) => error!(
                    target_id = %target.id,
                    url = short_url(&target.url),
                    error = %e,
                    "failed to attach to tab"
                ),
            }
        }

        if attached == 0 {
            dispatcher.close().await;
            return Err(CdpError::NoMatchingTabs {
                filter: config.tab_url_filter,
            });
        }
        info!(count = attached, tab_url_filter = %config.tab_url_filter, "attached to tabs");
        Ok(dispatcher)
    }

    async fn attach(&self, target: &TargetInfo, config: &DispatcherConfig) -> Result<(), CdpError> {
        let result = self
            .client
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target.id, "flatten": true }),
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::Cdp("attachToTarget returned no sessionId".into()))?
            .to_string();

        let route = self.connections.register(&target.id, &target.url);
        let _ = self.pages.write().insert(
            session_id.clone(),
            AttachedPage {
                target_id: target.id.clone(),
            },
        );

        let domains = [
            ("Network.enable", json!({})),
            ("Network.setCacheDisabled", json!({ "cacheDisabled": true })),
            ("Page.enable", json!({})),
        ];
        for (method, params) in domains {
            if let Err(e) = self.client.send_to_session(&session_id, method, params).await {
                let _ = self.pages.write().remove(&session_id);
                let _ = self.connections.remove(&target.id);
                self.detach(&session_id).await;
                return Err(e);
            }
        }

        info!(
            target_id = %target.id,
            route = %route.route_segment,
            identity = %route.short_identity,
            url = short_url(&target.url),
            "attached to tab"
        );

        if config.reload_on_attach {
            match self
                .client
                .send_to_session_with_timeout(&session_id, "Page.reload", json!({}), RELOAD_TIMEOUT)
                .await
            {
                Ok(_) => info!(target_id = %target.id, "reloaded tab after attach"),
                Err(e) => warn!(target_id = %target.id, error = %e, "failed to reload tab, continuing"),
            }
        }
        Ok(())
    }

    async fn detach(&self, session_id: &str) {
        let result = tokio::time::timeout(
            DETACH_TIMEOUT,
            self.client
                .send("Target.detachFromTarget", json!({ "sessionId": session_id })),
        )
        .await;
        if !matches!(result, Ok(Ok(_))) {
            debug!(session_id, "detach did not complete");
        }
    }

    /// Pages currently attached.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    /// Whether the browser socket is still open.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Detach from every page and drop the connection.
    pub async fn close(&self) {
        let sessions: Vec<(String, AttachedPage)> = self.pages.write().drain().collect();
        for (session_id, page) in &sessions {
            self.detach(session_id).await;
            let _ = self.connections.remove(&page.target_id);
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.client.shutdown();
        info!(pages = sessions.len(), "browser connection closed");
    }
}

/// Routes decoded events to the sinks.
struct EventRouter {
    client: Arc<CdpClient>,
    sinks: CaptureSinks,
    pages: PageMap,
}

impl EventRouter {
    async fn run(self, mut events: mpsc::Receiver<RawEvent>) {
        while let Some(raw) = events.recv().await {
            self.dispatch(raw);
        }
        warn!("protocol event stream ended");
    }

    fn dispatch(&self, raw: RawEvent) {
        let event = match CdpEvent::decode(&raw.method, raw.params) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                debug!(method = %raw.method, error = %e, "undecodable event");
                return;
            }
        };
        if let CdpEvent::DetachedFromTarget(detached) = &event {
            self.on_detached(detached);
            return;
        }

        let Some(session_id) = raw.session_id else {
            return;
        };
        let Some(target_id) = self
            .pages
            .read()
            .get(&session_id)
            .map(|p| p.target_id.clone())
        else {
            return;
        };
        let sinks = &self.sinks;
        let target_id = target_id.as_str();

        match event {
            CdpEvent::FrameNavigated(e) => {
                if e.frame.parent_id.is_none() {
                    self.on_navigated(target_id, &e.frame.url, "full");
                }
            }
            CdpEvent::NavigatedWithinDocument(e) => {
                self.on_navigated(target_id, &e.url, "same-document");
            }
            CdpEvent::RequestWillBeSent(e) => sinks.http.on_request_will_be_sent(target_id, &e),
            CdpEvent::ResponseReceived(e) => sinks.http.on_response_received(&e),
            CdpEvent::LoadingFinished(e) => {
                let fetcher: Arc<dyn BodyFetcher> =
                    Arc::new(PageBodyFetcher::new(Arc::clone(&self.client), session_id));
                let _ = sinks.http.on_loading_finished(target_id, &e, Some(fetcher));
            }
            CdpEvent::LoadingFailed(e) => sinks.http.on_loading_failed(&e),
            CdpEvent::WebSocketCreated(e) => {
                sinks.websocket.on_created(target_id, &e);
                if let Some(relay) = &sinks.relay {
                    relay.on_created(&e);
                }
            }
            CdpEvent::WebSocketFrameReceived(e) => {
                sinks.websocket.on_frame_received(target_id, &e);
                if let Some(relay) = &sinks.relay {
                    let _ = relay.on_frame_received(&e);
                }
            }
            CdpEvent::WebSocketFrameSent(e) => sinks.websocket.on_frame_sent(target_id, &e),
            CdpEvent::WebSocketClosed(e) => {
                sinks.websocket.on_closed(target_id, &e);
                if let Some(relay) = &sinks.relay {
                    relay.on_closed(&e);
                }
            }
            CdpEvent::DetachedFromTarget(_) => {}
        }
    }

    fn on_navigated(&self, target_id: &str, url: &str, kind: &str) {
        if let Err(e) = derive_route(url) {
            debug!(target_id, error = %e, "keeping previous route");
            return;
        }
        let route = self.sinks.connections.register(target_id, url);
        info!(
            target_id,
            kind,
            route = %route.route_segment,
            url = short_url(url),
            "tab navigated"
        );
    }

    fn on_detached(&self, event: &DetachedFromTarget) {
        let Some(page) = self.pages.write().remove(&event.session_id) else {
            return;
        };
        let _ = self.sinks.connections.remove(&page.target_id);
        warn!(target_id = %page.target_id, session_id = %event.session_id, "tab detached");
    }
}
