use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one ingestion lane, e.g. `financial_transactions_0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    /// Build the key for a stream name and partition
    pub fn new(name: &str, partition: i32) -> Self {
        Self(format!("{}_{}", name, partition))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StreamKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A single event as read from a source. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub stream_key: StreamKey,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl RawEvent {
    /// Position of this event in its source, kept for acknowledgment after
    /// the event itself has been handed to the window manager.
    pub fn position(&self) -> EventPosition {
        EventPosition {
            stream_key: self.stream_key.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPosition {
    pub stream_key: StreamKey,
    pub partition: i32,
    pub offset: i64,
}
