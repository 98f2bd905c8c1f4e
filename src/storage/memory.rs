use super::traits::{rank_windows, SearchFilter, StorageError, WindowStore};
use crate::window::types::{EmbeddedWindow, ScoredWindow};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Non-persistent window store, for tests and `storage.type: memory`
#[derive(Default)]
pub struct MemoryStore {
    windows: RwLock<HashMap<String, EmbeddedWindow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn upsert_window(&self, window: &EmbeddedWindow) -> Result<(), StorageError> {
        self.windows
            .write()
            .await
            .insert(window.window_id.clone(), window.clone());
        Ok(())
    }

    async fn get_window(&self, window_id: &str) -> Result<Option<EmbeddedWindow>, StorageError> {
        Ok(self.windows.read().await.get(window_id).cloned())
    }

    async fn search_similar(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredWindow>, StorageError> {
        let windows = self.windows.read().await;
        let candidates = windows.values().filter(|w| filter.matches(w)).cloned();
        rank_windows(query, candidates, k)
    }

    async fn count_windows(&self) -> Result<u64, StorageError> {
        Ok(self.windows.read().await.len() as u64)
    }
}
