use super::traits::{check_position, EventSource, SourceError};
use crate::window::event::{EventPosition, RawEvent, StreamKey};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Source fed from inside the process through an mpsc channel.
///
/// Exhausted once every sender has been dropped.
pub struct ChannelSource {
    stream_key: StreamKey,
    partition: i32,
    rx: mpsc::Receiver<RawEvent>,
    last_acked: Option<i64>,
}

impl ChannelSource {
    pub fn new(stream_key: StreamKey, partition: i32, rx: mpsc::Receiver<RawEvent>) -> Self {
        Self {
            stream_key,
            partition,
            rx,
            last_acked: None,
        }
    }

    /// Build a source together with the sender that feeds it
    pub fn channel(
        stream_key: StreamKey,
        partition: i32,
        capacity: usize,
    ) -> (mpsc::Sender<RawEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(stream_key, partition, rx))
    }

    /// Offset of the last acknowledged event
    pub fn last_acked(&self) -> Option<i64> {
        self.last_acked
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    fn partition(&self) -> i32 {
        self.partition
    }

    async fn pull(&mut self) -> Result<Option<RawEvent>, SourceError> {
        Ok(self.rx.recv().await)
    }

    async fn acknowledge(&mut self, position: &EventPosition) -> Result<(), SourceError> {
        check_position(&self.stream_key, position)?;
        self.last_acked = Some(position.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_event(key: &StreamKey, offset: i64) -> RawEvent {
        RawEvent {
            stream_key: key.clone(),
            partition: 0,
            offset,
            key: Vec::new(),
            value: b"{}".to_vec(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_source_drains_then_ends() {
        let key = StreamKey::new("orders", 0);
        let (tx, mut source) = ChannelSource::channel(key.clone(), 0, 4);
        tx.send(make_event(&key, 0)).await.unwrap();
        tx.send(make_event(&key, 1)).await.unwrap();
        drop(tx);

        let first = source.pull().await.unwrap().unwrap();
        source.acknowledge(&first.position()).await.unwrap();
        let second = source.pull().await.unwrap().unwrap();
        assert_eq!(second.offset, 1);
        assert!(source.pull().await.unwrap().is_none());
        assert_eq!(source.last_acked(), Some(0));
    }

    #[tokio::test]
    async fn test_channel_source_rejects_foreign_position() {
        let key = StreamKey::new("orders", 0);
        let (_tx, mut source) = ChannelSource::channel(key, 0, 1);
        let other = make_event(&StreamKey::new("payments", 0), 3);

        let err = source.acknowledge(&other.position()).await.unwrap_err();
        assert!(matches!(err, SourceError::ForeignPosition { offset: 3, .. }));
        assert_eq!(source.last_acked(), None);
    }
}
