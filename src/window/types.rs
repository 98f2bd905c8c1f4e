use crate::window::event::{RawEvent, StreamKey};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use tracing::warn;

/// Maximum number of events rendered into a window summary
pub const SUMMARY_EVENT_LIMIT: usize = 10;

/// Accumulated events for one open interval of one stream key.
///
/// A window is mutated only while it sits in the registry. Once closed it is
/// removed from the registry and handed to the processor as an immutable value.
#[derive(Debug, Clone)]
pub struct Window {
    id: String,
    stream_key: StreamKey,
    partition: i32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    events: Vec<RawEvent>,
    context: String,
    closed: bool,
    count: usize,
}

impl Window {
    pub fn new(
        stream_key: StreamKey,
        partition: i32,
        start_time: DateTime<Utc>,
        context: impl Into<String>,
    ) -> Self {
        let start_nanos = start_time
            .timestamp_nanos_opt()
            .unwrap_or_else(|| start_time.timestamp_micros() * 1000);

        Self {
            id: format!("{}_{}_{}", stream_key, partition, start_nanos),
            stream_key,
            partition,
            start_time,
            end_time: start_time,
            events: Vec::new(),
            context: context.into(),
            closed: false,
            count: 0,
        }
    }

    /// Add an event. `end_time` follows the timestamp of the latest event.
    pub fn append(&mut self, event: RawEvent) {
        self.end_time = event.timestamp;
        self.events.push(event);
        self.count += 1;
    }

    /// Mark the window closed and pin `end_time` to the closing time
    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        self.closed = true;
        self.end_time = at;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Render a text digest of the window for embedding and prompting.
    ///
    /// Only the first [`SUMMARY_EVENT_LIMIT`] events are rendered. Payloads
    /// that are JSON objects are listed field by field, anything else falls
    /// back to a single raw line.
    pub fn summarize(&self) -> String {
        if self.count == 0 {
            return format!(
                "Stream: {}, Window ID: {}, No events in this window.",
                self.stream_key, self.id
            );
        }

        let mut out = String::new();
        let _ = writeln!(out, "Stream: {}", self.stream_key);
        let _ = writeln!(out, "Stream Context: {}", self.context);
        let _ = writeln!(
            out,
            "Window ID: {}, Time Range: {} - {}, Total Events: {}",
            self.id,
            self.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.count
        );
        out.push_str("Events:\n");

        let rendered = self.count.min(SUMMARY_EVENT_LIMIT);
        for event in &self.events[..rendered] {
            self.render_event(&mut out, event);
        }

        if self.count > rendered {
            let _ = writeln!(
                out,
                "  ...and {} more events (truncated for summary).",
                self.count - rendered
            );
        }

        out
    }

    fn render_event(&self, out: &mut String, event: &RawEvent) {
        match serde_json::from_slice::<serde_json::Map<String, Value>>(&event.value) {
            Ok(fields) => {
                let _ = writeln!(out, "  - Event (Offset: {}) Details:", event.offset);
                for (name, value) in &fields {
                    let _ = writeln!(out, "    - {}: {}", name, display_value(value));
                }
            }
            Err(e) => {
                warn!(
                    stream_key = %self.stream_key,
                    offset = event.offset,
                    error = %e,
                    "Event payload is not a JSON object, using raw text"
                );
                let _ = writeln!(
                    out,
                    "  - Raw Event (Offset: {}): {}",
                    event.offset,
                    String::from_utf8_lossy(&event.value)
                );
            }
        }
    }
}

/// Strings are shown without JSON quoting; everything else uses JSON text
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A processed window as stored in the similarity index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedWindow {
    pub window_id: String,
    pub stream_key: StreamKey,
    pub partition: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_count: usize,
    /// The text that was embedded
    pub context_text: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_events: Option<Vec<RawEvent>>,
}

impl EmbeddedWindow {
    pub fn from_window(
        window: &Window,
        context_text: String,
        embedding: Vec<f32>,
        keep_raw_events: bool,
    ) -> Self {
        Self {
            window_id: window.id().to_string(),
            stream_key: window.stream_key().clone(),
            partition: window.partition(),
            start_time: window.start_time(),
            end_time: window.end_time(),
            event_count: window.count(),
            context_text,
            embedding,
            raw_events: keep_raw_events.then(|| window.events().to_vec()),
        }
    }
}

/// A search hit with its cosine similarity to the query vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredWindow {
    pub window: EmbeddedWindow,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(offset: i64, timestamp: &str, value: &str) -> RawEvent {
        RawEvent {
            stream_key: StreamKey::new("payments", 0),
            partition: 0,
            offset,
            key: Vec::new(),
            value: value.as_bytes().to_vec(),
            timestamp: timestamp.parse().unwrap(),
        }
    }

    fn make_window() -> Window {
        let start: DateTime<Utc> = "2026-01-28T10:00:00Z".parse().unwrap();
        Window::new(StreamKey::new("payments", 0), 0, start, "Card payments")
    }

    #[test]
    fn test_window_id_is_derived_from_key_partition_and_start() {
        let window = make_window();
        let start: DateTime<Utc> = "2026-01-28T10:00:00Z".parse().unwrap();
        assert_eq!(
            window.id(),
            format!("payments_0_0_{}", start.timestamp_nanos_opt().unwrap())
        );
    }

    #[test]
    fn test_append_tracks_count_and_end_time() {
        let mut window = make_window();
        window.append(make_event(1, "2026-01-28T10:00:01Z", "{}"));
        window.append(make_event(2, "2026-01-28T10:00:07Z", "{}"));

        assert_eq!(window.count(), 2);
        assert_eq!(window.events().len(), 2);
        assert_eq!(
            window.end_time(),
            "2026-01-28T10:00:07Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert!(!window.is_closed());
    }

    #[test]
    fn test_close_pins_end_time() {
        let mut window = make_window();
        window.append(make_event(1, "2026-01-28T10:00:01Z", "{}"));
        let closed_at: DateTime<Utc> = "2026-01-28T10:05:00Z".parse().unwrap();
        window.close(closed_at);

        assert!(window.is_closed());
        assert_eq!(window.end_time(), closed_at);
    }

    #[test]
    fn test_summarize_empty_window() {
        let window = make_window();
        let summary = window.summarize();
        assert!(summary.starts_with("Stream: payments_0, Window ID: "));
        assert!(summary.ends_with("No events in this window."));
    }

    #[test]
    fn test_summarize_renders_json_fields_sorted() {
        let mut window = make_window();
        window.append(make_event(
            7,
            "2026-01-28T10:00:01Z",
            r#"{"currency":"EUR","amount":12.5,"type":"debit"}"#,
        ));

        let summary = window.summarize();
        assert!(summary.contains("Stream: payments_0\n"));
        assert!(summary.contains("Stream Context: Card payments\n"));
        assert!(summary.contains(
            "Time Range: 2026-01-28T10:00:00Z - 2026-01-28T10:00:01Z, Total Events: 1"
        ));
        assert!(summary.contains(
            "  - Event (Offset: 7) Details:\n    - amount: 12.5\n    - currency: EUR\n    - type: debit\n"
        ));
    }

    #[test]
    fn test_summarize_falls_back_to_raw_text() {
        let mut window = make_window();
        window.append(make_event(3, "2026-01-28T10:00:01Z", "not json at all"));
        window.append(make_event(4, "2026-01-28T10:00:02Z", "[1, 2, 3]"));

        let summary = window.summarize();
        assert!(summary.contains("  - Raw Event (Offset: 3): not json at all\n"));
        assert!(summary.contains("  - Raw Event (Offset: 4): [1, 2, 3]\n"));
    }

    #[test]
    fn test_summarize_truncates_after_limit() {
        let mut window = make_window();
        for offset in 0..13 {
            window.append(make_event(offset, "2026-01-28T10:00:01Z", r#"{"n":1}"#));
        }

        let summary = window.summarize();
        assert_eq!(summary.matches("Details:").count(), SUMMARY_EVENT_LIMIT);
        assert!(summary.contains("Offset: 9)"));
        assert!(!summary.contains("Offset: 10)"));
        assert!(summary.contains("  ...and 3 more events (truncated for summary).\n"));
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let mut window = make_window();
        window.append(make_event(1, "2026-01-28T10:00:01Z", r#"{"b":2,"a":1}"#));
        window.append(make_event(2, "2026-01-28T10:00:02Z", "raw"));
        window.close("2026-01-28T10:01:00Z".parse().unwrap());

        assert_eq!(window.summarize(), window.summarize());
    }

    #[test]
    fn test_embedded_window_from_window() {
        let mut window = make_window();
        window.append(make_event(1, "2026-01-28T10:00:01Z", "{}"));

        let embedded = EmbeddedWindow::from_window(&window, "text".to_string(), vec![0.5], false);
        assert_eq!(embedded.window_id, window.id());
        assert_eq!(embedded.event_count, 1);
        assert!(embedded.raw_events.is_none());

        let embedded = EmbeddedWindow::from_window(&window, "text".to_string(), vec![0.5], true);
        assert_eq!(embedded.raw_events.as_ref().map(Vec::len), Some(1));
    }
}
