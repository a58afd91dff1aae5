//! Per-container log line parser.
//!
//! Each payload (the line with its Docker frame timestamp already split off)
//! is first tried as a structured JSON object. Anything else is buffered as
//! an unstructured block: continuation lines accumulate until a boundary (a
//! date-prefixed line, a configured flag prefix, or a structured line) closes
//! the block and the merged message is emitted as one entry.
//!
//! The parser is stateful per container; its state is the unstructured
//! buffer, owned by the supervisor and shared here.

use crate::collector::sanitize::clean_message;
use crate::entry::LogEntry;
use crate::sink::{LogSink, SinkError};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error};

/// Ordered keyword table for level inference; first match wins.
const LEVEL_KEYWORDS: [(&str, &str); 6] = [
    ("fatal", "FATAL"),
    ("panic", "PANIC"),
    ("error", "ERROR"),
    ("debug", "DEBUG"),
    ("warning", "WARN"),
    ("warn", "WARN"),
];

static DATE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}/\d{2}/\d{2}( \d{2}:\d{2}:\d{2}(\.\d{6})?)?")
        .expect("date prefix pattern is valid")
});

/// Buffered multi-line state for one container.
#[derive(Debug, Default)]
pub struct BufferState {
    container_id: String,
    container_name: String,
    lines: Vec<String>,
    base_time: String,
}

/// Map of per-container unstructured buffers.
///
/// The map lock only guards entry add/remove and handle lookup; each buffer
/// has its own lock so appends and flushes never serialize across
/// containers, and neither lock is held across a sink call.
#[derive(Debug, Default)]
pub struct UnstructuredBuffers {
    entries: RwLock<HashMap<String, Arc<Mutex<BufferState>>>>,
}

impl UnstructuredBuffers {
    /// Create an empty buffer map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh buffer for a container; called at worker start.
    pub fn insert(&self, container_id: &str, container_name: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            container_id.to_string(),
            Arc::new(Mutex::new(BufferState {
                container_id: container_id.to_string(),
                container_name: container_name.to_string(),
                lines: Vec::new(),
                base_time: String::new(),
            })),
        );
    }

    /// Drop a container's buffer; called on every worker exit path.
    pub fn remove(&self, container_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(container_id);
    }

    /// Whether a buffer exists for the container.
    pub fn contains(&self, container_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(container_id)
    }

    fn get(&self, container_id: &str) -> Option<Arc<Mutex<BufferState>>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(container_id).cloned()
    }
}

/// Fields shared by both parse paths before normalization.
struct RawEntry {
    level: String,
    time_text: String,
    caller: Option<String>,
    message: String,
    trace_id: Option<String>,
    extra: std::collections::BTreeMap<String, Value>,
}

/// Stateful parser turning payloads into normalized sink entries.
pub struct LogParser {
    sink: Arc<dyn LogSink>,
    buffers: Arc<UnstructuredBuffers>,
    line_flags: Vec<String>,
    time_layouts: Vec<String>,
}

impl LogParser {
    /// Build a parser over the shared buffer map and sink.
    pub fn new(
        sink: Arc<dyn LogSink>,
        buffers: Arc<UnstructuredBuffers>,
        line_flags: Vec<String>,
        time_layouts: Vec<String>,
    ) -> Self {
        Self {
            sink,
            buffers,
            line_flags,
            time_layouts,
        }
    }

    /// Process one payload for a container.
    ///
    /// Returns `Err` only when the sink rejected the entry produced from
    /// *this* line; buffered lines and flush failures of earlier blocks
    /// resolve to `Ok` so the caller's checkpoint keeps moving.
    pub async fn process(
        &self,
        frame_time: &str,
        payload: &str,
        container_id: &str,
        container_name: &str,
    ) -> Result<(), SinkError> {
        if let Some(raw) = self.try_parse_structured(payload) {
            // An open unstructured block precedes this line in the stream;
            // emit it first so arrival order survives.
            self.flush(container_id).await;
            return self
                .store_entry(raw, container_id, container_name)
                .await
                .map(|_| ());
        }

        if self.starts_new_block(payload) {
            self.flush(container_id).await;
        }

        let Some(buffer) = self.buffers.get(container_id) else {
            // Worker teardown raced this line; nothing to buffer into.
            debug!(container_id, "dropping line for disposed buffer");
            return Ok(());
        };

        let mut state = buffer.lock().unwrap_or_else(|e| e.into_inner());
        if state.lines.is_empty() {
            state.base_time = frame_time.to_string();
        }
        state.lines.push(payload.to_string());

        Ok(())
    }

    /// Emit any pending unstructured block for a container.
    ///
    /// Sink failures are logged and swallowed; the buffered lines are gone
    /// either way, matching the drop-and-continue policy for rejected
    /// entries.
    pub async fn flush(&self, container_id: &str) {
        let Some(buffer) = self.buffers.get(container_id) else {
            return;
        };

        let (lines, base_time, id, name) = {
            let mut state = buffer.lock().unwrap_or_else(|e| e.into_inner());
            if state.lines.is_empty() {
                return;
            }
            (
                std::mem::take(&mut state.lines),
                state.base_time.clone(),
                state.container_id.clone(),
                state.container_name.clone(),
            )
        };

        let time_text = extract_time_prefix(&lines[0])
            .map(str::to_string)
            .unwrap_or(base_time);
        let message = lines.join("\n");
        let level = determine_level(&message).to_string();

        let raw = RawEntry {
            level,
            time_text,
            caller: None,
            message,
            trace_id: None,
            extra: Default::default(),
        };

        if let Err(err) = self.store_entry(raw, &id, &name).await {
            error!(container_name = %name, error = %err, "failed to store unstructured block");
        }
    }

    /// Try the structured path: a JSON object with the known field keys.
    fn try_parse_structured(&self, payload: &str) -> Option<RawEntry> {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(payload) else {
            return None;
        };

        let mut raw = RawEntry {
            level: String::new(),
            time_text: String::new(),
            caller: None,
            message: String::new(),
            trace_id: None,
            extra: Default::default(),
        };

        for (key, value) in map {
            match key.as_str() {
                "L" => raw.level = stringify(&value),
                "T" => raw.time_text = stringify(&value),
                "C" => raw.caller = non_empty(stringify(&value)),
                "M" => raw.message = stringify(&value),
                "TraceID" => raw.trace_id = non_empty(stringify(&value)),
                _ => {
                    raw.extra.insert(key, value);
                }
            }
        }

        Some(raw)
    }

    /// Whether a payload opens a new unstructured block.
    fn starts_new_block(&self, payload: &str) -> bool {
        if extract_time_prefix(payload).is_some() {
            return true;
        }
        self.line_flags.iter().any(|flag| payload.starts_with(flag))
    }

    /// Normalize and persist one entry.
    ///
    /// Returns `Ok(false)` for entries skipped locally (empty message,
    /// unparseable time); `Err` only for sink rejection.
    async fn store_entry(
        &self,
        raw: RawEntry,
        container_id: &str,
        container_name: &str,
    ) -> Result<bool, SinkError> {
        let message = clean_message(&raw.message);
        if message.is_empty() {
            return Ok(false);
        }

        let time = if raw.time_text.is_empty() {
            None
        } else {
            match self.parse_time(&raw.time_text) {
                Some(parsed) => Some(parsed),
                None => {
                    error!(
                        time = %raw.time_text,
                        container_name,
                        "no configured layout matches log time, dropping entry"
                    );
                    return Ok(false);
                }
            }
        };

        let entry = LogEntry {
            level: raw.level,
            time,
            caller: raw.caller,
            message,
            trace_id: raw.trace_id,
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            extra: raw.extra,
        };

        match self.sink.store(entry).await {
            Ok(_) => Ok(true),
            Err(err) => {
                error!(container_name, error = %err, "failed to store log entry");
                Err(err)
            }
        }
    }

    /// Parse a time string against the configured layouts, in order.
    ///
    /// RFC-3339 is tried first since that is what the daemon and zap-style
    /// loggers emit; naive layouts are interpreted in local time.
    fn parse_time(&self, text: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Some(ts.with_timezone(&Utc));
        }

        for layout in &self.time_layouts {
            if let Ok(ts) = DateTime::parse_from_str(text, layout) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, layout) {
                if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                    return Some(local.with_timezone(&Utc));
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(text, layout) {
                let naive = date.and_hms_opt(0, 0, 0)?;
                if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                    return Some(local.with_timezone(&Utc));
                }
            }
        }

        None
    }
}

/// Infer a level from merged unstructured content; first keyword wins.
pub fn determine_level(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    for (keyword, level) in LEVEL_KEYWORDS {
        if lower.contains(keyword) {
            return level;
        }
    }
    "INFO"
}

/// Extract a leading date/time prefix when the line starts with one.
fn extract_time_prefix(line: &str) -> Option<&str> {
    DATE_PREFIX.find(line).map(|m| m.as_str())
}

/// Printable form of a JSON value; null becomes empty.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use chrono::Timelike;

    const FRAME_TIME: &str = "2024-07-02T16:53:00.265646061Z";

    fn parser_with_sink() -> (LogParser, Arc<MemorySink>, Arc<UnstructuredBuffers>) {
        let sink = Arc::new(MemorySink::new());
        let buffers = Arc::new(UnstructuredBuffers::new());
        buffers.insert("cid1", "api");
        let parser = LogParser::new(
            sink.clone(),
            buffers.clone(),
            crate::config::default_line_flags(),
            crate::config::default_time_layouts(),
        );
        (parser, sink, buffers)
    }

    async fn feed(parser: &LogParser, lines: &[&str]) {
        for line in lines {
            parser.process(FRAME_TIME, line, "cid1", "api").await.ok();
        }
    }

    #[tokio::test]
    async fn test_structured_line_maps_known_fields() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &[r#"{"L":"INFO","T":"2024-07-02T05:56:54.617Z","C":"bootstrap/http.go:67","M":"Mux loaded successfully","TraceID":"abc","k":42}"#],
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.level, "INFO");
        assert_eq!(entry.caller.as_deref(), Some("bootstrap/http.go:67"));
        assert_eq!(entry.message, "Mux loaded successfully");
        assert_eq!(entry.trace_id.as_deref(), Some("abc"));
        assert_eq!(entry.extra.get("k"), Some(&Value::from(42)));

        let time = entry.time.expect("structured time parsed");
        assert_eq!(
            time,
            DateTime::parse_from_rfc3339("2024-07-02T05:56:54.617Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_zap_offset_timestamp_parses() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &[r#"{"L":"ERROR","T":"2024-07-02T15:00:27.978+0800","M":"create log error"}"#],
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        let time = entries[0].time.expect("offset time parsed");
        assert_eq!(time.with_timezone(&Utc).hour(), 7);
    }

    #[tokio::test]
    async fn test_gin_debug_block_then_structured_flush_order() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &[
                "[GIN-debug] GET /ping --> handler (5 handlers)",
                "  - using env: export GIN_MODE=release",
                r#"{"L":"INFO","T":"2024-07-02T05:56:54.617Z","M":"Mux loaded successfully"}"#,
            ],
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);

        // Unstructured block first, merged with newline, level inferred.
        assert_eq!(entries[0].level, "DEBUG");
        assert_eq!(
            entries[0].message,
            "[GIN-debug] GET /ping --> handler (5 handlers)\n  - using env: export GIN_MODE=release"
        );
        assert_eq!(entries[1].message, "Mux loaded successfully");
    }

    #[tokio::test]
    async fn test_panic_block_closed_by_flag_prefix() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &[
                "panic: eee",
                "goroutine 9 [running]:",
                "\t/path/file.go:42 +0x49e",
                "[GIN-debug] GET /next --> handler",
            ],
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, "PANIC");
        assert_eq!(
            entries[0].message,
            "panic: eee\ngoroutine 9 [running]:\n\t/path/file.go:42 +0x49e"
        );

        // The boundary line opened a fresh buffer.
        parser.flush("cid1").await;
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "[GIN-debug] GET /next --> handler");
        assert_eq!(entries[1].level, "DEBUG");
    }

    #[tokio::test]
    async fn test_date_prefixed_line_starts_new_block_and_sets_time() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &[
                "[GIN-warning] something odd",
                "2024/07/01 09:50:04 record not found",
            ],
        )
        .await;
        parser.flush("cid1").await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "[GIN-warning] something odd");
        assert_eq!(entries[1].message, "2024/07/01 09:50:04 record not found");
        // Time comes from the line's own prefix, not the frame timestamp.
        let time = entries[1].time.expect("prefix time parsed");
        let local = time.with_timezone(&Local);
        assert_eq!(local.second(), 4);
    }

    #[tokio::test]
    async fn test_ansi_sanitization_on_structured_message() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &["{\"L\":\"ERROR\",\"M\":\"\u{1b}[31mError:\u{1b}[0m boom\"}"],
        )
        .await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "Error: boom");
    }

    #[tokio::test]
    async fn test_empty_structured_message_not_emitted() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(&parser, &[r#"{"L":"INFO","M":""}"#, r#"{"L":"INFO","M":"  "}"#]).await;
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_time_drops_entry() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(
            &parser,
            &[r#"{"L":"INFO","T":"full moon last tuesday","M":"hello"}"#],
        )
        .await;
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_non_string_field_values_are_coerced() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(&parser, &[r#"{"L":42,"M":true,"TraceID":null}"#]).await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, "42");
        assert_eq!(entries[0].message, "true");
        assert_eq!(entries[0].trace_id, None);
    }

    #[tokio::test]
    async fn test_flush_on_missing_buffer_is_noop() {
        let (parser, sink, buffers) = parser_with_sink();
        buffers.remove("cid1");
        parser.flush("cid1").await;
        parser.process(FRAME_TIME, "orphan line", "cid1", "api").await.unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_base_time_used_when_first_line_has_no_prefix() {
        let (parser, sink, _buffers) = parser_with_sink();
        feed(&parser, &["panic: boom"]).await;
        parser.flush("cid1").await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        let time = entries[0].time.expect("frame time parsed as base time");
        assert_eq!(
            time,
            DateTime::parse_from_rfc3339(FRAME_TIME).unwrap()
        );
    }

    #[test]
    fn test_determine_level_order() {
        assert_eq!(determine_level("Warning: fatal"), "FATAL");
        assert_eq!(determine_level("panic: eee"), "PANIC");
        assert_eq!(determine_level("an ERROR happened"), "ERROR");
        assert_eq!(determine_level("[GIN-debug] route"), "DEBUG");
        assert_eq!(determine_level("warning only"), "WARN");
        assert_eq!(determine_level("warn only"), "WARN");
        assert_eq!(determine_level("all quiet"), "INFO");
    }

    #[test]
    fn test_date_prefix_variants() {
        assert!(extract_time_prefix("2024/07/01 rest").is_some());
        assert_eq!(
            extract_time_prefix("2024/07/01 09:50:04 rest"),
            Some("2024/07/01 09:50:04")
        );
        assert_eq!(
            extract_time_prefix("2024/07/01 09:50:04.123456 rest"),
            Some("2024/07/01 09:50:04.123456")
        );
        assert!(extract_time_prefix("on 2024/07/01 rest").is_none());
        assert!(extract_time_prefix("[GIN-debug] x").is_none());
    }
}
