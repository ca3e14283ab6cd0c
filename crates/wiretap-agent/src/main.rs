//! # wiretap
//!
//! Capture binary: loads settings, attaches to the browser, persists
//! traffic and serves health, metrics and the live relay over HTTP.

#![deny(unsafe_code)]

mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use wiretap_cdp::EventDispatcher;
use wiretap_server::{ServerConfig, ShutdownCoordinator, WiretapServer};
use wiretap_settings::WiretapSettings;

use crate::pipeline::{CaptureStatus, Pipeline, dispatcher_config};

/// Browser traffic capture.
#[derive(Parser, Debug)]
#[command(name = "wiretap", about = "Capture browser HTTP and WebSocket traffic")]
struct Cli {
    /// Settings file (defaults to `~/.wiretap/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Root of the capture tree.
    #[arg(long)]
    data_dir: Option<String>,

    /// Only attach to pages whose URL contains this (case-insensitive).
    #[arg(long)]
    tab_filter: Option<String>,

    /// Relay feed rules; also enables the relay.
    #[arg(long)]
    relay_config: Option<String>,

    /// HTTP listen address.
    #[arg(long)]
    bind: Option<String>,

    /// Log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Overlay command-line flags onto loaded settings.
    fn apply(&self, settings: &mut WiretapSettings) {
        if let Some(dir) = &self.data_dir {
            settings.storage.data_dir.clone_from(dir);
        }
        if let Some(filter) = &self.tab_filter {
            settings.cdp.tab_url_filter.clone_from(filter);
        }
        if let Some(path) = &self.relay_config {
            settings.relay.enabled = true;
            settings.relay.config_path.clone_from(path);
        }
        if let Some(bind) = &self.bind {
            settings.server.bind_addr.clone_from(bind);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<WiretapSettings> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(wiretap_settings::settings_path);
    let mut settings = wiretap_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings: {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

/// Install logging. The guard must outlive `main`'s work.
///
/// An empty log directory means stderr only; a log directory that cannot
/// be created is fatal.
fn init_logging(settings: &WiretapSettings) -> Result<Option<wiretap_logging::WorkerGuard>> {
    let logging = &settings.logging;
    if logging.dir.trim().is_empty() {
        wiretap_logging::init_subscriber(&logging.level);
        return Ok(None);
    }
    let guard = wiretap_logging::init_subscriber_with_file(
        &logging.level,
        Path::new(&logging.dir),
        &logging.file_name,
    )
    .with_context(|| format!("Failed to create log directory: {}", logging.dir))?;
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let _log_guard = init_logging(&settings)?;

    info!(
        cdp = %settings.cdp.http_url(),
        tab_url_filter = %settings.cdp.tab_url_filter,
        data_dir = %settings.storage.data_dir,
        "starting wiretap"
    );

    let metrics = match wiretap_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    };

    let pipeline = Arc::new(Pipeline::build(&settings)?);

    let dispatcher = match EventDispatcher::connect(
        &settings.cdp.http_url(),
        dispatcher_config(&settings),
        pipeline.sinks(),
    )
    .await
    {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(e) => {
            let _ = pipeline.shutdown().await;
            return Err(e).context("Failed to attach to the browser");
        }
    };

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let status = Arc::new(CaptureStatus {
        pipeline: Arc::clone(&pipeline),
        dispatcher: Arc::clone(&dispatcher),
    });
    let mut server = WiretapServer::new(
        ServerConfig {
            bind_addr: settings.server.bind_addr.clone(),
        },
        status,
    )
    .with_shutdown(Arc::clone(&shutdown));
    if let Some(broker) = &pipeline.broker {
        server = server.with_relay(Arc::clone(broker));
    }
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let handle = match server.start().await {
        Ok(handle) => handle,
        Err(e) => {
            dispatcher.close().await;
            let _ = pipeline.shutdown().await;
            return Err(e).context("Failed to start HTTP server");
        }
    };
    info!("wiretap listening on http://{}", handle.addr);

    shutdown.wait_for_signal().await;
    info!("shutting down");

    dispatcher.close().await;
    let timeout = Duration::from_secs(settings.server.shutdown_timeout_secs);
    let _ = shutdown.graceful_shutdown(vec![handle.task], timeout).await;
    let lost = pipeline.shutdown().await;
    if lost > 0 {
        warn!(lost, "records lost at shutdown");
    }

    info!("shutdown complete");
    Ok(())
}
