use crate::config::parse::load_config;
use crate::config::types::{Config, StorageType};
use crate::inference::OllamaClient;
use crate::pipeline::{start_stream, EmbeddingProcessor, StreamHandle};
use crate::query::QueryService;
use crate::storage::{DuckDbStore, MemoryStore, WindowStore};
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "config not found in ~/.config/streamrag/config.yml or /etc/streamrag/config.yml; \
         use --config <path> or run 'streamrag config init'"
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("inference client error: {0}")]
    Inference(#[from] crate::inference::InferenceError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    run_pipeline(&config_path).await
}

/// Open the configured window store and make sure its schema exists
pub async fn build_store(config: &Config) -> Result<Arc<dyn WindowStore>, RunError> {
    let store: Arc<dyn WindowStore> = match config.storage.storage_type {
        StorageType::Memory => {
            info!("Using in-memory window store");
            Arc::new(MemoryStore::new())
        }
        StorageType::Duckdb => {
            let path = config
                .storage
                .path
                .as_deref()
                .ok_or_else(|| crate::storage::StorageError::Database("no storage path configured".to_string()))?;
            info!(path = %path.display(), "Initializing storage");
            Arc::new(DuckDbStore::new(path)?)
        }
    };

    store.init_schema().await?;
    Ok(store)
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let store = build_store(&config).await?;
    let ollama = Arc::new(OllamaClient::new(&config.ollama)?);
    info!(url = %config.ollama.url, "Using Ollama for embeddings and generation");

    let processor = Arc::new(
        EmbeddingProcessor::new(ollama.clone(), store.clone())
            .keep_raw_events(config.pipeline.keep_raw_events)
            .skip_empty_windows(config.pipeline.skip_empty_windows),
    );

    // Cancelling this stops every consumer
    let consumers_cancel = CancellationToken::new();
    let streams: Vec<StreamHandle> = config
        .streams
        .iter()
        .map(|stream| {
            info!(
                stream_key = %stream.stream_key(),
                duration_secs = stream.window_duration_seconds,
                max_events = stream.window_max_events,
                "Starting stream"
            );
            start_stream(
                stream,
                processor.clone(),
                consumers_cancel.child_token(),
                config.pipeline.retry_backoff,
            )
        })
        .collect();

    let query = Arc::new(QueryService::new(
        ollama.clone(),
        ollama,
        store,
        config.web.top_k,
    ));
    let state = AppState {
        query,
        managers: Arc::new(streams.iter().map(|s| s.manager().clone()).collect()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listen = config.web.listen.clone();
    let web_handle = tokio::spawn(async move { run_server(state, &listen, shutdown_rx).await });

    info!("Pipeline started, press Ctrl+C to shutdown");
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");

    // Stop consumers first so no event arrives after the final flush
    consumers_cancel.cancel();
    for stream in streams {
        let name = stream.name().to_string();
        match stream.stop(config.pipeline.shutdown_grace).await {
            Ok(stats) => info!(
                stream = %name,
                events = stats.events,
                pull_errors = stats.pull_errors,
                ack_errors = stats.ack_errors,
                "Stream stopped"
            ),
            Err(e) => error!(stream = %name, error = %e, "Stream stopped with error"),
        }
    }

    let _ = shutdown_tx.send(true);
    match web_handle.await {
        Ok(Ok(())) => info!("Web server stopped"),
        Ok(Err(e)) => return Err(RunError::WebServer(e)),
        Err(e) => error!(error = %e, "Web server task join error"),
    }

    info!("Pipeline shutdown complete");
    Ok(())
}
