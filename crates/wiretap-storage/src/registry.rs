//! Lazily-constructed writers, one per stream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};
use wiretap_core::RecordKind;

use crate::jsonl::{DEFAULT_CLOSE_TIMEOUT, JsonlWriter, WriterConfig};
use crate::rotate::RotationPolicy;

/// Identity of one JSONL stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WriterKey {
    /// Route segment.
    pub route: String,
    /// Record kind.
    pub kind: RecordKind,
    /// Short identity.
    pub identity: String,
}

/// Memoizes one [`JsonlWriter`] per [`WriterKey`].
pub struct WriterRegistry {
    base_dir: PathBuf,
    buffer_size: usize,
    rotation: RotationPolicy,
    writers: RwLock<HashMap<WriterKey, Arc<JsonlWriter>>>,
}

impl WriterRegistry {
    /// Registry writing under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, buffer_size: usize, rotation: RotationPolicy) -> Self {
        Self {
            base_dir: base_dir.into(),
            buffer_size,
            rotation,
            writers: RwLock::new(HashMap::new()),
        }
    }

    /// Root of the capture tree.
    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    /// Writer for `(route, kind, identity)`, created on first use.
    ///
    /// Must be called within a Tokio runtime.
    pub fn get_writer(&self, route: &str, kind: RecordKind, identity: &str) -> Arc<JsonlWriter> {
        let key = WriterKey {
            route: route.to_string(),
            kind,
            identity: identity.to_string(),
        };
        if let Some(writer) = self.writers.read().get(&key) {
            return Arc::clone(writer);
        }

        let mut writers = self.writers.write();
        if let Some(writer) = writers.get(&key) {
            return Arc::clone(writer);
        }
        let writer = Arc::new(JsonlWriter::spawn(WriterConfig {
            base_dir: self.base_dir.clone(),
            route: key.route.clone(),
            kind,
            identity: key.identity.clone(),
            buffer_size: self.buffer_size,
            rotation: self.rotation.clone(),
        }));
        info!(stream = writer.stream(), "created writer");
        let _ = writers.insert(key, Arc::clone(&writer));
        writer
    }

    /// Number of writers constructed so far.
    pub fn len(&self) -> usize {
        self.writers.read().len()
    }

    /// Whether no writer has been constructed.
    pub fn is_empty(&self) -> bool {
        self.writers.read().is_empty()
    }

    /// Close every writer and clear the registry.
    ///
    /// Each writer gets the default drain budget. Not meant to race with
    /// [`get_writer`](Self::get_writer).
    pub async fn close_all(&self) -> usize {
        self.close_all_with(DEFAULT_CLOSE_TIMEOUT).await
    }

    /// [`close_all`](Self::close_all) with an explicit per-writer budget.
    /// Returns the total number of records lost.
    pub async fn close_all_with(&self, timeout: Duration) -> usize {
        let writers: Vec<Arc<JsonlWriter>> = self.writers.write().drain().map(|(_, w)| w).collect();
        let mut lost = 0;
        for writer in &writers {
            lost += writer.close(timeout).await;
        }
        if lost > 0 {
            warn!(writers = writers.len(), lost, "writers closed with lost records");
        } else {
            info!(writers = writers.len(), "all writers closed");
        }
        lost
    }
}
