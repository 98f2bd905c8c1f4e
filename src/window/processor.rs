use crate::window::types::Window;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("inference error: {0}")]
    Inference(#[from] crate::inference::InferenceError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("{0}")]
    Other(String),
}

/// Consumer of closed windows.
///
/// Called exactly once per closed window, on a task detached from ingestion.
/// Errors are logged by the window manager and never retried there.
#[async_trait]
pub trait WindowProcessor: Send + Sync {
    async fn process(&self, window: &Window) -> Result<(), ProcessorError>;
}
