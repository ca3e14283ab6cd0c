//! HTTP lifecycle correlation.
//!
//! Each exchange moves through `Started -> ResponseReceived -> Finished |
//! Failed`. The pending state for an exchange lives in one map behind one
//! lock; the body fetch that follows `loadingFinished` runs as a detached,
//! time-bounded task that owns a snapshot of the record, so nothing is
//! shared between the event handler and the continuation.
//!
//! Exchanges whose terminal event never arrives are evicted by a periodic
//! sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wiretap_core::metrics::{PENDING_EVICTED_TOTAL, PENDING_EXCHANGES};
use wiretap_core::protocol::{
    LoadingFailed, LoadingFinished, PostDataEntry, RequestWillBeSent, ResponseReceived,
    string_headers,
};
use wiretap_core::{ConnectionRoute, HttpCapture, HttpRequest, HttpResponse, RecordKind, truncate};
use wiretap_storage::{ResourceWriter, WriterRegistry, filename_from_url, static_resource_dir};

use crate::connections::ConnectionRegistry;
use crate::errors::CaptureError;

/// Budget for one response-body fetch.
pub const BODY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// How often pending exchanges are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Age after which a pending exchange is evicted.
pub const STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Fetches a response body from the page that issued the request.
#[async_trait]
pub trait BodyFetcher: Send + Sync {
    /// Raw body bytes for `request_id`.
    async fn fetch_body(&self, request_id: &str) -> Result<Vec<u8>, CaptureError>;
}

/// What the HTTP correlator persists.
#[derive(Debug, Clone)]
pub struct HttpCaptureConfig {
    /// Write HTTP records to the JSONL stream.
    pub capture_http: bool,
    /// Write static resource bodies to disk.
    pub capture_static: bool,
    /// Body limit for JSONL records. `0` disables the limit.
    pub max_body_bytes: usize,
    /// Body limit for static resources. `0` disables the limit.
    pub resource_max_bytes: usize,
}

impl Default for HttpCaptureConfig {
    fn default() -> Self {
        Self {
            capture_http: true,
            capture_static: true,
            max_body_bytes: 50 * 1024 * 1024,
            resource_max_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct PendingExchange {
    record: HttpCapture,
    first_seen: Instant,
    resource_type: String,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingExchange>>>;

/// Correlates network events into one [`HttpCapture`] per exchange.
pub struct HttpCorrelator {
    config: HttpCaptureConfig,
    connections: Arc<ConnectionRegistry>,
    writers: Arc<WriterRegistry>,
    resources: ResourceWriter,
    pending: PendingMap,
    cancel: CancellationToken,
}

impl HttpCorrelator {
    /// New correlator. Call [`spawn_sweeper`](Self::spawn_sweeper) to start
    /// staleness eviction.
    pub fn new(
        config: HttpCaptureConfig,
        connections: Arc<ConnectionRegistry>,
        writers: Arc<WriterRegistry>,
        resources: ResourceWriter,
    ) -> Self {
        Self {
            config,
            connections,
            writers,
            resources,
            pending: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// `Network.requestWillBeSent`: start tracking the exchange.
    pub fn on_request_will_be_sent(&self, target_id: &str, event: &RequestWillBeSent) {
        let post_data = decode_post_data(&event.request.post_data_entries);
        let record = HttpCapture {
            timestamp: Utc::now(),
            request_id: event.request_id.clone(),
            tab_id: target_id.to_string(),
            url: event.request.url.clone(),
            method: event.request.method.clone(),
            request: HttpRequest {
                headers: string_headers(&event.request.headers),
                post_data,
            },
            response: None,
        };
        let exchange = PendingExchange {
            record,
            first_seen: Instant::now(),
            resource_type: event.resource_type.clone().unwrap_or_default(),
        };
        let mut pending = self.pending.lock();
        let _ = pending.insert(event.request_id.clone(), exchange);
        metrics::gauge!(PENDING_EXCHANGES).set(pending.len() as f64);
    }

    /// `Network.responseReceived`: attach status and headers.
    pub fn on_response_received(&self, event: &ResponseReceived) {
        let mut pending = self.pending.lock();
        let Some(exchange) = pending.get_mut(&event.request_id) else {
            debug!(request_id = %event.request_id, "response for untracked exchange");
            return;
        };
        exchange.record.response = Some(HttpResponse {
            status: event.response.status,
            status_text: event.response.status_text.clone(),
            headers: string_headers(&event.response.headers),
            ..HttpResponse::default()
        });
        exchange.resource_type.clone_from(&event.resource_type);
    }

    /// `Network.loadingFinished`: stop tracking and complete the record in
    /// the background.
    ///
    /// Returns the completion task, or `None` when the exchange was not
    /// tracked or nothing would be persisted.
    pub fn on_loading_finished(
        &self,
        target_id: &str,
        event: &LoadingFinished,
        fetcher: Option<Arc<dyn BodyFetcher>>,
    ) -> Option<JoinHandle<()>> {
        let Some(exchange) = self.take(&event.request_id) else {
            debug!(request_id = %event.request_id, "finish for untracked exchange");
            return None;
        };

        let resource_dir = if self.config.capture_static {
            static_resource_dir(&exchange.resource_type)
        } else {
            None
        };
        if !self.config.capture_http && resource_dir.is_none() {
            return None;
        }

        let completion = Completion {
            record: exchange.record,
            route: self.connections.resolve(target_id),
            resource_dir,
            fetcher,
            config: self.config.clone(),
            writers: Arc::clone(&self.writers),
            resources: self.resources.clone(),
        };
        Some(tokio::spawn(completion.run()))
    }

    /// `Network.loadingFailed`: drop the exchange. Failed exchanges are not
    /// recorded.
    pub fn on_loading_failed(&self, event: &LoadingFailed) {
        if self.take(&event.request_id).is_some() {
            debug!(
                request_id = %event.request_id,
                error = %event.error_text,
                canceled = event.canceled,
                "exchange failed"
            );
        }
    }

    fn take(&self, request_id: &str) -> Option<PendingExchange> {
        let mut pending = self.pending.lock();
        let exchange = pending.remove(request_id);
        metrics::gauge!(PENDING_EXCHANGES).set(pending.len() as f64);
        exchange
    }

    /// Exchanges currently tracked.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Evict exchanges first seen more than [`STALE_AFTER`] before `now`.
    /// Returns the number evicted.
    pub fn sweep_stale_at(&self, now: Instant) -> usize {
        sweep(&self.pending, now)
    }

    /// Start the periodic staleness sweep. It stops on [`close`](Self::close).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = sweep(&pending, Instant::now());
                    }
                }
            }
            debug!("pending exchange sweeper stopped");
        })
    }

    /// Stop the sweeper.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

fn sweep(pending: &Mutex<HashMap<String, PendingExchange>>, now: Instant) -> usize {
    let mut pending = pending.lock();
    let before = pending.len();
    pending.retain(|_, exchange| now.saturating_duration_since(exchange.first_seen) <= STALE_AFTER);
    let evicted = before - pending.len();
    metrics::gauge!(PENDING_EXCHANGES).set(pending.len() as f64);
    if evicted > 0 {
        metrics::counter!(PENDING_EVICTED_TOTAL).increment(evicted as u64);
        info!(evicted, remaining = pending.len(), "evicted stale pending exchanges");
    }
    evicted
}

/// Concatenate POST entries, base64-decoding each one independently. An
/// entry that is not valid base64 is kept as-is.
fn decode_post_data(entries: &[PostDataEntry]) -> Option<String> {
    let mut bytes = Vec::new();
    for encoded in entries.iter().filter_map(|e| e.bytes.as_deref()) {
        if encoded.is_empty() {
            continue;
        }
        match STANDARD.decode(encoded) {
            Ok(decoded) => bytes.extend_from_slice(&decoded),
            Err(_) => bytes.extend_from_slice(encoded.as_bytes()),
        }
    }
    if bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn attach_body(response: &mut HttpResponse, body: &[u8], max_bytes: usize) {
    let bounded = truncate(body, max_bytes);
    match std::str::from_utf8(bounded.data) {
        Ok(text) => response.body = Some(text.to_string()),
        Err(_) => response.body_base64 = Some(STANDARD.encode(bounded.data)),
    }
    if bounded.truncated {
        response.truncated = true;
        response.original_size = Some(bounded.original_size);
        response.sha256 = bounded.sha256;
    }
}

async fn fetch_with_timeout(fetcher: &dyn BodyFetcher, request_id: &str) -> Option<Vec<u8>> {
    match tokio::time::timeout(BODY_FETCH_TIMEOUT, fetcher.fetch_body(request_id)).await {
        Ok(Ok(body)) => Some(body),
        Ok(Err(e)) => {
            debug!(request_id, error = %e, "failed to get response body");
            None
        }
        Err(_) => {
            let e = CaptureError::Timeout {
                request_id: request_id.to_string(),
                timeout_ms: BODY_FETCH_TIMEOUT.as_millis() as u64,
            };
            debug!(request_id, error = %e, "failed to get response body");
            None
        }
    }
}

/// Work left for an exchange after `loadingFinished`.
struct Completion {
    record: HttpCapture,
    route: ConnectionRoute,
    resource_dir: Option<&'static str>,
    fetcher: Option<Arc<dyn BodyFetcher>>,
    config: HttpCaptureConfig,
    writers: Arc<WriterRegistry>,
    resources: ResourceWriter,
}

impl Completion {
    async fn run(self) {
        let Self {
            mut record,
            route,
            resource_dir,
            fetcher,
            config,
            writers,
            resources,
        } = self;

        let body = match (&record.response, fetcher) {
            (Some(_), Some(fetcher)) => fetch_with_timeout(fetcher.as_ref(), &record.request_id)
                .await
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        if let Some(dir) = resource_dir.filter(|_| !body.is_empty()) {
            let bounded = truncate(&body, config.resource_max_bytes);
            let filename = filename_from_url(&record.url);
            match resources
                .write(&route.route_segment, dir, &filename, bounded.data)
                .await
            {
                Err(e) => error!(request_id = %record.request_id, error = %e, "failed to write resource file"),
                Ok(path) if bounded.truncated => warn!(
                    request_id = %record.request_id,
                    file = %path.display(),
                    original_size = bounded.original_size,
                    kept_size = bounded.data.len(),
                    sha256 = bounded.sha256.as_deref().unwrap_or_default(),
                    "resource truncated to size limit"
                ),
                Ok(_) => {}
            }
        }

        if !config.capture_http {
            return;
        }
        if let Some(response) = record.response.as_mut().filter(|_| !body.is_empty()) {
            attach_body(response, &body, config.max_body_bytes);
        }

        let writer = writers.get_writer(&route.route_segment, RecordKind::Http, &route.short_identity);
        if let Err(e) = writer.submit(record.into()) {
            debug!(error = %e, "http record not queued");
        }
    }
}
