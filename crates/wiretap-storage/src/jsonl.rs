//! Bounded-queue JSON-lines writer.
//!
//! One writer owns one logical stream `(route, kind, identity)`. Records are
//! queued without blocking and drained by an async task that hands each
//! batch to the blocking pool, so a writer only occupies a blocking thread
//! while it is actually writing. The active file lives at
//! `<base>/<YYYY-MM-DD>/<route>/<kind>/<identity>.jsonl` and moves to a new
//! day directory when the UTC date changes; size rotation is handled by
//! [`RotatingFile`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wiretap_core::metrics::{RECORDS_DROPPED_TOTAL, RECORDS_WRITTEN_TOTAL};
use wiretap_core::{CaptureRecord, RecordKind};

use crate::errors::StorageError;
use crate::rotate::{RotatingFile, RotationPolicy};

/// Default drain budget for [`JsonlWriter::close`].
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Most records written per blocking batch.
const DRAIN_BATCH: usize = 256;

/// Everything needed to place and size one stream.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Root of the capture tree.
    pub base_dir: PathBuf,
    /// Route segment.
    pub route: String,
    /// Record kind.
    pub kind: RecordKind,
    /// Short identity; the file name falls back to the open time when empty.
    pub identity: String,
    /// Queue capacity.
    pub buffer_size: usize,
    /// Size rotation and retention.
    pub rotation: RotationPolicy,
}

impl WriterConfig {
    /// `route/kind/identity`, for logs and errors.
    pub fn stream(&self) -> String {
        format!("{}/{}/{}", self.route, self.kind, self.identity)
    }

    /// Directory holding this stream's files for `date`.
    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.base_dir
            .join(date.format("%Y-%m-%d").to_string())
            .join(&self.route)
            .join(self.kind.as_str())
    }

    fn file_name(&self) -> String {
        if self.identity.is_empty() {
            format!("{}.jsonl", Utc::now().timestamp())
        } else {
            format!("{}.jsonl", self.identity)
        }
    }
}

/// Asynchronous JSON-lines writer for one stream.
pub struct JsonlWriter {
    stream: String,
    tx: RwLock<Option<mpsc::Sender<CaptureRecord>>>,
    pending: Arc<AtomicUsize>,
    abort: Arc<AtomicBool>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlWriter {
    /// Start a writer and its drain task. Files are opened lazily.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(config: WriterConfig) -> Self {
        let stream = config.stream();
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let abort = Arc::new(AtomicBool::new(false));
        let drain = {
            let pending = Arc::clone(&pending);
            let abort = Arc::clone(&abort);
            tokio::spawn(drain_loop(config, rx, pending, abort))
        };
        Self {
            stream,
            tx: RwLock::new(Some(tx)),
            pending,
            abort,
            drain: Mutex::new(Some(drain)),
        }
    }

    /// `route/kind/identity`.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Records queued but not yet written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Queue a record without blocking.
    ///
    /// A full queue drops the record with a warning.
    pub fn submit(&self, record: CaptureRecord) -> Result<(), StorageError> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            metrics::counter!(RECORDS_DROPPED_TOTAL, "reason" => "closed").increment(1);
            return Err(StorageError::Closed {
                stream: self.stream.clone(),
            });
        };
        let _ = self.pending.fetch_add(1, Ordering::Relaxed);
        match tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                let _ = self.pending.fetch_sub(1, Ordering::Relaxed);
                metrics::counter!(RECORDS_DROPPED_TOTAL, "reason" => "queue_full").increment(1);
                warn!(
                    stream = %self.stream,
                    request_id = record.request_id(),
                    "write queue full, dropping record"
                );
                Err(StorageError::QueueFull {
                    stream: self.stream.clone(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let _ = self.pending.fetch_sub(1, Ordering::Relaxed);
                metrics::counter!(RECORDS_DROPPED_TOTAL, "reason" => "closed").increment(1);
                Err(StorageError::Closed {
                    stream: self.stream.clone(),
                })
            }
        }
    }

    /// Stop accepting records and drain the queue for at most `timeout`.
    ///
    /// Returns the number of records lost to the timeout. Repeated calls
    /// return `0`.
    pub async fn close(&self, timeout: Duration) -> usize {
        drop(self.tx.write().take());
        let Some(handle) = self.drain.lock().take() else {
            return 0;
        };
        if tokio::time::timeout(timeout, handle).await.is_ok() {
            debug!(stream = %self.stream, "writer closed");
            return 0;
        }
        self.abort.store(true, Ordering::Relaxed);
        let lost = self.pending();
        metrics::counter!(RECORDS_DROPPED_TOTAL, "reason" => "close_timeout")
            .increment(lost as u64);
        warn!(
            stream = %self.stream,
            lost,
            timeout_ms = timeout.as_millis() as u64,
            "writer close timed out, records lost"
        );
        lost
    }
}

async fn drain_loop(
    config: WriterConfig,
    mut rx: mpsc::Receiver<CaptureRecord>,
    pending: Arc<AtomicUsize>,
    abort: Arc<AtomicBool>,
) {
    let stream = config.stream();
    let mut sink = DaySink::new(config);
    let mut batch = Vec::with_capacity(DRAIN_BATCH);
    while rx.recv_many(&mut batch, DRAIN_BATCH).await > 0 {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let records = std::mem::take(&mut batch);
        let count = records.len();
        let written = tokio::task::spawn_blocking(move || {
            for record in &records {
                sink.write(record, Utc::now().date_naive());
            }
            sink
        })
        .await;
        match written {
            Ok(returned) => sink = returned,
            Err(e) => {
                error!(stream = %stream, error = %e, "writer batch failed, stream stopped");
                return;
            }
        }
        let _ = pending.fetch_sub(count, Ordering::Relaxed);
    }
    if let Err(e) = tokio::task::spawn_blocking(move || sink.close()).await {
        error!(stream = %stream, error = %e, "failed to close stream");
    }
}

/// Day-partitioned output for one stream.
pub(crate) struct DaySink {
    config: WriterConfig,
    current: Option<(NaiveDate, RotatingFile)>,
}

impl DaySink {
    pub(crate) fn new(config: WriterConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Serialize and append `record` to the file for `today`.
    pub(crate) fn write(&mut self, record: &CaptureRecord, today: NaiveDate) {
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                error!(stream = %self.config.stream(), error = %e, "failed to serialize record");
                return;
            }
        };
        line.push(b'\n');

        let Some(file) = self.file_for(today) else {
            return;
        };
        match file.write_all(&line) {
            Ok(()) => metrics::counter!(RECORDS_WRITTEN_TOTAL).increment(1),
            Err(e) => {
                let path = file.path().to_path_buf();
                error!(
                    stream = %self.config.stream(),
                    file = %path.display(),
                    error = %e,
                    "failed to write record"
                );
            }
        }
    }

    fn file_for(&mut self, today: NaiveDate) -> Option<&mut RotatingFile> {
        let stale = self.current.as_ref().is_none_or(|(date, _)| *date != today);
        if stale {
            self.close();
            let path = self.config.day_dir(today).join(self.config.file_name());
            match RotatingFile::open(&path, self.config.rotation.clone()) {
                Ok(file) => {
                    info!(stream = %self.config.stream(), file = %path.display(), "opened new JSONL file");
                    self.current = Some((today, file));
                }
                Err(e) => {
                    error!(file = %path.display(), error = %e, "failed to open output file");
                    return None;
                }
            }
        }
        self.current.as_mut().map(|(_, file)| file)
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(_, file)| file.path())
    }

    pub(crate) fn close(&mut self) {
        if let Some((_, mut file)) = self.current.take() {
            if let Err(e) = file.close() {
                error!(file = %file.path().display(), error = %e, "failed to close output file");
            }
        }
    }
}
