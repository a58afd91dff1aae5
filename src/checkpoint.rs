//! Per-container resume checkpoints.
//!
//! The collector records the last processed Docker frame timestamp for each
//! container name so a restart resumes where it left off instead of replaying
//! the whole stream. Values are opaque text (RFC-3339 nano as emitted by the
//! daemon); the store is a plain key/value contract.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Errors from checkpoint reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Embedded store error.
    #[error("checkpoint store error: {0}")]
    Store(#[from] sled::Error),
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Build the store key for a container name.
pub fn checkpoint_key(container_name: &str) -> String {
    format!("{container_name}:lastTimestamp")
}

/// Minimal key/value contract the collector needs for resume state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read a checkpoint value; `Ok(None)` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a checkpoint value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Production checkpoint store backed by an embedded sled database.
///
/// Writes land in sled's in-memory tree and are flushed by its background
/// task; a crash can lose the most recent cursor updates, which the
/// at-least-once contract absorbs as reprocessed lines.
pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    /// Open (or create) the checkpoint database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.db.get(key)?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.db.insert(key, value.as_bytes())?;
        Ok(())
    }
}

/// In-memory checkpoint store for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored values.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
