use crate::config::types::StreamConfig;
use crate::source::{EventSource, FileSource};
use crate::window::manager::{WindowManager, WindowPolicy};
use crate::window::processor::WindowProcessor;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("consumer task for '{stream}' failed: {message}")]
    Consumer { stream: String, message: String },
}

/// Counters returned by [`run_consumer`] when it stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub events: u64,
    pub pull_errors: u64,
    pub ack_errors: u64,
}

/// Drive events from `source` into `manager` until the source is exhausted
/// or `cancel` fires.
///
/// Pull errors are logged and retried after `retry_backoff`. An event is
/// acknowledged only after the manager has accepted it; acknowledgment
/// failures are logged and never stop the loop.
pub async fn run_consumer<S>(
    source: &mut S,
    manager: &WindowManager,
    cancel: CancellationToken,
    retry_backoff: Duration,
) -> ConsumerStats
where
    S: EventSource + ?Sized,
{
    let stream_key = source.stream_key().clone();
    let mut stats = ConsumerStats::default();

    manager.open(stream_key.clone(), source.partition());
    info!(stream_key = %stream_key, "Consumer started");

    loop {
        let pulled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            pulled = source.pull() => pulled,
        };

        match pulled {
            Ok(Some(event)) => {
                let position = event.position();
                manager.ingest(event);
                stats.events += 1;

                if let Err(e) = source.acknowledge(&position).await {
                    stats.ack_errors += 1;
                    warn!(
                        stream_key = %stream_key,
                        offset = position.offset,
                        error = %e,
                        "Failed to acknowledge event"
                    );
                }
            }
            Ok(None) => {
                info!(stream_key = %stream_key, "Source exhausted");
                break;
            }
            Err(e) => {
                stats.pull_errors += 1;
                warn!(
                    stream_key = %stream_key,
                    error = %e,
                    retry_ms = retry_backoff.as_millis() as u64,
                    "Failed to read from source, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_backoff) => {}
                }
            }
        }
    }

    info!(
        stream_key = %stream_key,
        events = stats.events,
        pull_errors = stats.pull_errors,
        ack_errors = stats.ack_errors,
        "Consumer stopped"
    );
    stats
}

/// A running stream: its window manager and the consumer task feeding it
pub struct StreamHandle {
    name: String,
    manager: WindowManager,
    consumer: JoinHandle<ConsumerStats>,
}

impl StreamHandle {
    pub fn manager(&self) -> &WindowManager {
        &self.manager
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the consumer to stop, then flush and shut down the manager.
    /// `cancel` must already be cancelled or the source exhausted.
    pub async fn stop(self, grace: Duration) -> Result<ConsumerStats, PipelineError> {
        let result = self.consumer.await;
        self.manager.shutdown(grace).await;

        result.map_err(|e| PipelineError::Consumer {
            stream: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Build the file source and window manager for one configured stream and
/// start consuming.
pub fn start_stream(
    config: &StreamConfig,
    processor: Arc<dyn WindowProcessor>,
    cancel: CancellationToken,
    retry_backoff: Duration,
) -> StreamHandle {
    let manager = WindowManager::new(WindowPolicy::from(config), processor);
    let mut source = FileSource::new(config.stream_key(), config.partition, &config.source);

    debug!(
        stream = %config.name,
        path = %config.source.path.display(),
        "Starting stream"
    );

    let consumer_manager = manager.clone();
    let consumer = tokio::spawn(async move {
        run_consumer(&mut source, &consumer_manager, cancel, retry_backoff).await
    });

    StreamHandle {
        name: config.name.clone(),
        manager,
        consumer,
    }
}
