//! Log persistence sink.
//!
//! The collector hands every normalized [`LogEntry`] to a [`LogSink`] and
//! moves on; schema mapping and persistence semantics belong to the sink
//! implementation. The crate ships an append-only JSON-lines sink for the
//! daemon binary and an in-memory sink for tests and embedders. Relational
//! deployments implement the trait against their own database.

use crate::entry::LogEntry;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Errors from sink writes.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Underlying storage I/O failed.
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized.
    #[error("sink serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The sink rejected the entry.
    #[error("sink rejected entry: {0}")]
    Rejected(String),
}

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Persistence contract for normalized log entries.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist one entry, returning its assigned id.
    async fn store(&self, entry: LogEntry) -> Result<i64>;
}

/// Append-only JSON-lines sink used by the daemon binary.
pub struct JsonlSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
    next_id: AtomicI64,
}

impl JsonlSink {
    /// Open (or create) the sink file at `path` in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            file: tokio::sync::Mutex::new(file),
            next_id: AtomicI64::new(1),
        })
    }
}

#[async_trait]
impl LogSink for JsonlSink {
    async fn store(&self, entry: LogEntry) -> Result<i64> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// In-memory sink that records entries in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, in arrival order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn store(&self, entry: LogEntry) -> Result<i64> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
        Ok(entries.len() as i64)
    }
}
