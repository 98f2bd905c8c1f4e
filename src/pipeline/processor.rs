use crate::inference::Embedder;
use crate::storage::WindowStore;
use crate::window::processor::{ProcessorError, WindowProcessor};
use crate::window::types::{EmbeddedWindow, Window};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Summarizes a closed window, embeds the summary and upserts the result
/// into the window store.
pub struct EmbeddingProcessor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn WindowStore>,
    keep_raw_events: bool,
    skip_empty_windows: bool,
}

impl EmbeddingProcessor {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn WindowStore>) -> Self {
        Self {
            embedder,
            store,
            keep_raw_events: false,
            skip_empty_windows: true,
        }
    }

    /// Store the raw events alongside each window
    pub fn keep_raw_events(mut self, keep: bool) -> Self {
        self.keep_raw_events = keep;
        self
    }

    pub fn skip_empty_windows(mut self, skip: bool) -> Self {
        self.skip_empty_windows = skip;
        self
    }
}

#[async_trait]
impl WindowProcessor for EmbeddingProcessor {
    async fn process(&self, window: &Window) -> Result<(), ProcessorError> {
        if window.is_empty() && self.skip_empty_windows {
            debug!(window_id = %window.id(), "Skipping empty window");
            return Ok(());
        }

        let context_text = window.summarize();
        let embedding = self.embedder.embed(&context_text).await?;
        let dimensions = embedding.len();

        let embedded =
            EmbeddedWindow::from_window(window, context_text, embedding, self.keep_raw_events);
        self.store.upsert_window(&embedded).await?;

        info!(
            window_id = %window.id(),
            stream_key = %window.stream_key(),
            events = window.count(),
            dimensions = dimensions,
            "Stored window"
        );
        Ok(())
    }
}
