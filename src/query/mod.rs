pub mod prompt;

pub use prompt::build_rag_prompt;

use crate::inference::{Embedder, Generator, InferenceError};
use crate::storage::{SearchFilter, StorageError, WindowStore};
use crate::window::types::ScoredWindow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("top_k must be greater than 0")]
    InvalidTopK,

    #[error("failed to embed prompt: {0}")]
    Embed(#[source] InferenceError),

    #[error("failed to retrieve relevant context: {0}")]
    Search(#[from] StorageError),

    #[error("failed to generate answer: {0}")]
    Generate(#[source] InferenceError),
}

/// Answer with the windows it was grounded on
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredWindow>,
}

/// Retrieval-augmented question answering over stored windows
pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    store: Arc<dyn WindowStore>,
    default_top_k: usize,
}

impl QueryService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn WindowStore>,
        default_top_k: usize,
    ) -> Self {
        Self {
            embedder,
            generator,
            store,
            default_top_k,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    pub async fn answer(
        &self,
        prompt: &str,
        top_k: Option<usize>,
        filter: &SearchFilter,
    ) -> Result<Answer, QueryError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(QueryError::EmptyPrompt);
        }
        let top_k = top_k.unwrap_or(self.default_top_k);
        if top_k == 0 {
            return Err(QueryError::InvalidTopK);
        }

        info!(prompt = %prompt, top_k = top_k, "Received query");

        let query = self.embedder.embed(prompt).await.map_err(QueryError::Embed)?;
        let sources = self.store.search_similar(&query, top_k, filter).await?;
        debug!(hits = sources.len(), "Retrieved windows");

        let rag_prompt = build_rag_prompt(prompt, &sources);
        let text = self
            .generator
            .generate(&rag_prompt)
            .await
            .map_err(QueryError::Generate)?;

        Ok(Answer { text, sources })
    }
}
