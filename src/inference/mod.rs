pub mod ollama;

pub use ollama::OllamaClient;

use async_trait::async_trait;

/// Text to vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError>;
}

/// Text to text
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

impl InferenceError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::Status { status, .. } => *status == 429 || *status >= 500,
            InferenceError::Connection { .. } => true,
            InferenceError::Client(_) | InferenceError::InvalidResponse { .. } => false,
        }
    }
}
