use crate::window::event::{EventPosition, RawEvent, StreamKey};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("position {offset} belongs to stream '{got}', not '{expected}'")]
    ForeignPosition {
        expected: StreamKey,
        got: StreamKey,
        offset: i64,
    },

    #[error("source error: {0}")]
    Other(String),
}

/// Pull-based event supplier for a single stream key.
///
/// Errors from `pull` are treated as transient by the consumer loop and
/// retried; `Ok(None)` means the source is exhausted.
#[async_trait]
pub trait EventSource: Send {
    fn stream_key(&self) -> &StreamKey;

    fn partition(&self) -> i32;

    async fn pull(&mut self) -> Result<Option<RawEvent>, SourceError>;

    /// Mark everything up to and including `position` as handled
    async fn acknowledge(&mut self, position: &EventPosition) -> Result<(), SourceError>;
}

/// Reject positions that were not produced by this source
pub(crate) fn check_position(
    expected: &StreamKey,
    position: &EventPosition,
) -> Result<(), SourceError> {
    if &position.stream_key != expected {
        return Err(SourceError::ForeignPosition {
            expected: expected.clone(),
            got: position.stream_key.clone(),
            offset: position.offset,
        });
    }
    Ok(())
}
