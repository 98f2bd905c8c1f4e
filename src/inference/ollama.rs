use super::{Embedder, Generator, InferenceError};
use crate::config::types::OllamaConfig;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest pause between two attempts
const MAX_BACKOFF: Duration = Duration::from_secs(32);

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a local Ollama server, used both for embeddings and for
/// answer generation.
///
/// Rate-limited (429), server (5xx) and connection failures are retried with
/// exponential backoff starting at one second; any other error is returned
/// immediately.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    embedding_model: String,
    llm_model: String,
    embed_client: reqwest::Client,
    generate_client: reqwest::Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, InferenceError> {
        let embed_client = reqwest::Client::builder()
            .timeout(config.embed_timeout)
            .build()?;
        let generate_client = reqwest::Client::builder()
            .timeout(config.generate_timeout)
            .build()?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            llm_model: config.llm_model.clone(),
            embed_client,
            generate_client,
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay; later delays keep doubling
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(5);
        (self.backoff_base * factor).min(MAX_BACKOFF)
    }

    async fn post_json<B, R>(
        &self,
        client: &reqwest::Client,
        path: &str,
        body: &B,
    ) -> Result<R, InferenceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let endpoint = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                debug!(endpoint = %endpoint, attempt = attempt, delay_ms = delay.as_millis() as u64, "Retrying Ollama request");
                tokio::time::sleep(delay).await;
            }

            match self.send_once(client, &endpoint, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    warn!(endpoint = %endpoint, attempt = attempt, error = %e, "Ollama request failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| InferenceError::Connection {
            endpoint,
            message: "no attempts made".to_string(),
        }))
    }

    async fn send_once<B, R>(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        body: &B,
    ) -> Result<R, InferenceError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::Connection {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| InferenceError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            prompt: text,
        };
        let response: EmbedResponse = self
            .post_json(&self.embed_client, "/api/embeddings", &request)
            .await?;

        if response.embedding.is_empty() {
            return Err(InferenceError::InvalidResponse {
                endpoint: format!("{}/api/embeddings", self.base_url),
                message: "empty embedding".to_string(),
            });
        }
        Ok(response.embedding)
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            model: &self.llm_model,
            prompt,
            stream: false,
        };
        let response: GenerateResponse = self
            .post_json(&self.generate_client, "/api/generate", &request)
            .await?;
        Ok(response.response)
    }
}
