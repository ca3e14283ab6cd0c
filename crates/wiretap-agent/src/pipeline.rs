//! Capture pipeline assembly from settings.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use wiretap_capture::{ConnectionRegistry, HttpCaptureConfig, HttpCorrelator, WebSocketCorrelator};
use wiretap_cdp::{CaptureSinks, DispatcherConfig, EventDispatcher};
use wiretap_relay::{Broker, RelayConfig, RelayEngine};
use wiretap_server::{PipelineCounters, StatusProbe};
use wiretap_settings::{StorageSettings, WiretapSettings};
use wiretap_storage::{ResourceWriter, RotationPolicy, WriterRegistry};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Rotation policy for the JSONL writers.
pub fn rotation_policy(storage: &StorageSettings) -> RotationPolicy {
    RotationPolicy {
        max_size: storage.max_file_size_bytes(),
        max_backups: storage.max_backups,
        max_age: (storage.max_age_days > 0)
            .then(|| Duration::from_secs(storage.max_age_days.saturating_mul(SECS_PER_DAY))),
        compress: storage.compress_backups,
    }
}

/// Attachment behavior for the dispatcher.
pub fn dispatcher_config(settings: &WiretapSettings) -> DispatcherConfig {
    DispatcherConfig {
        tab_url_filter: settings.cdp.tab_url_filter.clone(),
        reload_on_attach: settings.cdp.reload_on_attach,
        command_timeout: Duration::from_millis(settings.cdp.command_timeout_ms),
    }
}

/// Everything downstream of the protocol client.
pub struct Pipeline {
    /// Target routes.
    pub connections: Arc<ConnectionRegistry>,
    /// JSONL writers.
    pub writers: Arc<WriterRegistry>,
    /// HTTP correlation.
    pub http: Arc<HttpCorrelator>,
    /// `WebSocket` correlation.
    pub websocket: Arc<WebSocketCorrelator>,
    /// Relay engine, when enabled.
    pub relay: Option<Arc<RelayEngine>>,
    /// Relay broker, when enabled.
    pub broker: Option<Arc<Broker>>,
}

impl Pipeline {
    /// Build the pipeline. A relay config that cannot be loaded or a data
    /// directory that cannot be created is fatal.
    pub fn build(settings: &WiretapSettings) -> Result<Self> {
        let data_dir = Path::new(&settings.storage.data_dir);
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let (relay, broker) = if settings.relay.enabled {
            let path = Path::new(&settings.relay.config_path);
            let config = RelayConfig::load(path)
                .with_context(|| format!("Failed to load relay config: {}", path.display()))?;
            let broker = Arc::new(Broker::new());
            let engine = RelayEngine::new(config, Arc::clone(&broker));
            info!(feeds = engine.feed_count(), "relay enabled");
            (Some(Arc::new(engine)), Some(broker))
        } else {
            (None, None)
        };

        let connections = Arc::new(ConnectionRegistry::new());
        let writers = Arc::new(WriterRegistry::new(
            data_dir,
            settings.storage.buffer_size,
            rotation_policy(&settings.storage),
        ));

        let http = Arc::new(HttpCorrelator::new(
            HttpCaptureConfig {
                capture_http: settings.capture.http,
                capture_static: settings.capture.static_resources,
                max_body_bytes: settings.capture.http_max_body_bytes,
                resource_max_bytes: settings.capture.resource_max_bytes,
            },
            Arc::clone(&connections),
            Arc::clone(&writers),
            ResourceWriter::new(data_dir),
        ));
        drop(http.spawn_sweeper());

        let websocket = Arc::new(WebSocketCorrelator::new(
            settings.capture.websocket,
            settings.capture.ws_max_frame_bytes,
            Arc::clone(&connections),
            Arc::clone(&writers),
        ));

        info!(
            data_dir = %data_dir.display(),
            http = settings.capture.http,
            websocket = settings.capture.websocket,
            static_resources = settings.capture.static_resources,
            "capture pipeline ready"
        );

        Ok(Self {
            connections,
            writers,
            http,
            websocket,
            relay,
            broker,
        })
    }

    /// Sinks handed to the dispatcher.
    pub fn sinks(&self) -> CaptureSinks {
        CaptureSinks {
            connections: Arc::clone(&self.connections),
            http: Arc::clone(&self.http),
            websocket: Arc::clone(&self.websocket),
            relay: self.relay.clone(),
        }
    }

    /// Counters for `attached_pages` attached pages.
    pub fn counters(&self, attached_pages: usize) -> PipelineCounters {
        PipelineCounters {
            attached_pages,
            pending_exchanges: self.http.pending_count(),
            active_websockets: self.websocket.active_connections(),
            relay_subscribers: self.broker.as_ref().map_or(0, |b| b.client_count()),
        }
    }

    /// Stop the sweeper and drain every writer. Returns records lost.
    pub async fn shutdown(&self) -> usize {
        self.http.close();
        self.writers.close_all().await
    }
}

/// Live counters for `/health`.
pub struct CaptureStatus {
    /// The pipeline the counters come from.
    pub pipeline: Arc<Pipeline>,
    /// The attached browser.
    pub dispatcher: Arc<EventDispatcher>,
}

impl StatusProbe for CaptureStatus {
    fn counters(&self) -> PipelineCounters {
        self.pipeline.counters(self.dispatcher.page_count())
    }
}
