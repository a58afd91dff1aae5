//! Normalized log record model.
//!
//! A [`LogEntry`] is the unit handed to the [`LogSink`](crate::sink::LogSink)
//! after parsing and sanitization. The sink owns schema mapping; the entry
//! carries only the fields the collector produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One normalized log record ready for persistence.
///
/// `level` is the verbatim level text for structured inputs and an inferred
/// value for unstructured blocks. `time` is the timestamp parsed from the log
/// payload itself, not the Docker frame timestamp; it is left unset when the
/// payload carried none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log severity, e.g. `INFO`, `ERROR`, `PANIC`.
    pub level: String,
    /// Wall-clock time carried by the log payload, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Source location text for structured inputs that carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    /// Sanitized message text; never empty at persistence time.
    pub message: String,
    /// Correlation id carried from structured inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Id of the container the line came from.
    pub container_id: String,
    /// Name of the container the line came from.
    pub container_name: String,
    /// Structured fields not covered by the dedicated columns.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra: BTreeMap<String, Value>,
}

impl LogEntry {
    /// Create an entry with required provenance and empty optional fields.
    pub fn new(container_id: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            level: String::new(),
            time: None,
            caller: None,
            message: String::new(),
            trace_id: None,
            container_id: container_id.into(),
            container_name: container_name.into(),
            extra: BTreeMap::new(),
        }
    }
}
