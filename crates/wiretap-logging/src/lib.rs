//! # wiretap-logging
//!
//! `tracing` subscriber setup.
//!
//! Two entry points:
//! - [`init_subscriber`]: human-readable output on stderr
//! - [`init_subscriber_with_file`]: stderr plus a daily rolling log file,
//!   written off-thread through a non-blocking appender
//!
//! `RUST_LOG` takes precedence over the level passed in.

#![deny(unsafe_code)]

use std::path::Path;

pub use tracing_appender::non_blocking::WorkerGuard;
pub use tracing_appender::rolling::InitError;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with stderr output only.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // set_global_default is a no-op if already set
    let _ = subscriber.try_init();
}

/// Initialize the global subscriber with stderr output AND a daily rolling
/// file `<dir>/<file_name>.<YYYY-MM-DD>`.
///
/// The returned guard flushes the file writer when dropped; hold it for the
/// life of the process.
pub fn init_subscriber_with_file(
    level: &str,
    dir: &Path,
    file_name: &str,
) -> Result<WorkerGuard, InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer);

    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}
