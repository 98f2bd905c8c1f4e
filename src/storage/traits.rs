use crate::window::event::StreamKey;
use crate::window::types::{EmbeddedWindow, ScoredWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Persistent home of processed windows and the similarity index over them.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Insert or replace the window with the same `window_id`
    async fn upsert_window(&self, window: &EmbeddedWindow) -> Result<(), StorageError>;

    async fn get_window(&self, window_id: &str) -> Result<Option<EmbeddedWindow>, StorageError>;

    /// The `k` windows closest to `query` by cosine similarity, best first.
    async fn search_similar(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredWindow>, StorageError>;

    async fn count_windows(&self) -> Result<u64, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding dimension mismatch: query has {query}, stored window has {stored}")]
    DimensionMismatch { query: usize, stored: usize },
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// Scalar metadata filters for similarity search. Unset fields match all
/// windows; set fields are combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub stream_key: Option<StreamKey>,
    pub partition: Option<i32>,
    /// Only windows that started at or after this instant
    pub start_after: Option<DateTime<Utc>>,
    /// Only windows that ended at or before this instant
    pub end_before: Option<DateTime<Utc>>,
}

impl SearchFilter {
    pub fn for_stream(stream_key: StreamKey) -> Self {
        Self {
            stream_key: Some(stream_key),
            ..Self::default()
        }
    }

    pub fn matches(&self, window: &EmbeddedWindow) -> bool {
        if let Some(key) = &self.stream_key {
            if &window.stream_key != key {
                return false;
            }
        }
        if let Some(partition) = self.partition {
            if window.partition != partition {
                return false;
            }
        }
        if let Some(after) = self.start_after {
            if window.start_time < after {
                return false;
            }
        }
        if let Some(before) = self.end_before {
            if window.end_time > before {
                return false;
            }
        }
        true
    }
}

/// Cosine similarity of two vectors of equal length. Zero-norm input scores 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, StorageError> {
    if a.len() != b.len() {
        return Err(StorageError::DimensionMismatch {
            query: a.len(),
            stored: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// Score every candidate against `query` and keep the best `k`, ordered by
/// descending score then ascending window id.
pub fn rank_windows<I>(query: &[f32], candidates: I, k: usize) -> Result<Vec<ScoredWindow>, StorageError>
where
    I: IntoIterator<Item = EmbeddedWindow>,
{
    let mut scored = Vec::new();
    for window in candidates {
        let score = cosine_similarity(query, &window.embedding)?;
        scored.push(ScoredWindow { window, score });
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.window.window_id.cmp(&b.window.window_id))
    });
    scored.truncate(k);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_window(id: &str, stream: &str, embedding: Vec<f32>) -> EmbeddedWindow {
        let start: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
        EmbeddedWindow {
            window_id: id.to_string(),
            stream_key: StreamKey::from(stream),
            partition: 0,
            start_time: start,
            end_time: start + chrono::Duration::seconds(60),
            event_count: 1,
            context_text: String::new(),
            embedding,
            raw_events: None,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { query: 2, stored: 1 }));
    }

    #[test]
    fn test_rank_windows_orders_and_truncates() {
        let windows = vec![
            make_window("b", "orders_0", vec![1.0, 0.0]),
            make_window("c", "orders_0", vec![0.0, 1.0]),
            make_window("a", "orders_0", vec![2.0, 0.0]),
        ];

        let ranked = rank_windows(&[1.0, 0.0], windows, 2).unwrap();
        let ids: Vec<&str> = ranked.iter().map(|s| s.window.window_id.as_str()).collect();
        // Equal scores fall back to id order
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_filter_matches() {
        let window = make_window("a", "orders_0", vec![1.0]);

        assert!(SearchFilter::default().matches(&window));
        assert!(SearchFilter::for_stream(StreamKey::from("orders_0")).matches(&window));
        assert!(!SearchFilter::for_stream(StreamKey::from("payments_0")).matches(&window));

        let filter = SearchFilter {
            partition: Some(1),
            ..SearchFilter::default()
        };
        assert!(!filter.matches(&window));

        let filter = SearchFilter {
            start_after: Some(window.start_time),
            end_before: Some(window.end_time),
            ..SearchFilter::default()
        };
        assert!(filter.matches(&window));

        let filter = SearchFilter {
            end_before: Some(window.start_time),
            ..SearchFilter::default()
        };
        assert!(!filter.matches(&window));
    }
}
