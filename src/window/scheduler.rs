use crate::window::event::StreamKey;
use std::fmt;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound on the interval between elapsed-time checks
const MAX_TICK: Duration = Duration::from_secs(1);

/// What caused a window to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    MaxEvents,
    Duration,
    Flush,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::MaxEvents => "max_events",
            CloseReason::Duration => "duration",
            CloseReason::Flush => "flush",
        };
        f.write_str(s)
    }
}

/// Target of scheduler-driven rotation.
///
/// `rotate` must be a no-op returning `false` when the window identified by
/// `(key, generation)` is no longer the open window for `key`.
pub(crate) trait Rotate: Send + Sync + 'static {
    fn rotate(&self, key: &StreamKey, generation: u64, reason: CloseReason) -> bool;
}

/// Per-window scheduler state, created together with the window
pub(crate) struct ScheduledWindow {
    pub stream_key: StreamKey,
    pub generation: u64,
    pub opened_at: Instant,
    pub duration: Duration,
    pub flush_rx: mpsc::Receiver<()>,
    pub cancel: CancellationToken,
}

/// Drive one window instance to closure.
///
/// Ends after requesting a rotation, on cancellation, or when the rotation
/// target has been dropped. A pending flush request always wins over
/// cancellation so that a shutdown flush is never lost.
pub(crate) async fn run_scheduler<R: Rotate>(target: Weak<R>, mut window: ScheduledWindow) {
    let period = window.duration.min(MAX_TICK);
    let mut ticker = interval_at(window.opened_at + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            Some(()) = window.flush_rx.recv() => {
                if let Some(target) = target.upgrade() {
                    target.rotate(&window.stream_key, window.generation, CloseReason::Flush);
                }
                return;
            }

            _ = window.cancel.cancelled() => {
                debug!(
                    stream_key = %window.stream_key,
                    generation = window.generation,
                    "Window scheduler cancelled"
                );
                return;
            }

            _ = ticker.tick() => {
                if window.opened_at.elapsed() < window.duration {
                    continue;
                }
                if let Some(target) = target.upgrade() {
                    target.rotate(&window.stream_key, window.generation, CloseReason::Duration);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingRotate {
        calls: Mutex<Vec<(StreamKey, u64, CloseReason, Instant)>>,
    }

    impl Rotate for RecordingRotate {
        fn rotate(&self, key: &StreamKey, generation: u64, reason: CloseReason) -> bool {
            self.calls
                .lock()
                .unwrap()
                .push((key.clone(), generation, reason, Instant::now()));
            true
        }
    }

    fn schedule(duration: Duration) -> (ScheduledWindow, mpsc::Sender<()>, CancellationToken) {
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let window = ScheduledWindow {
            stream_key: StreamKey::new("orders", 0),
            generation: 7,
            opened_at: Instant::now(),
            duration,
            flush_rx,
            cancel: cancel.clone(),
        };
        (window, flush_tx, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_rotates_after_duration() {
        let target = Arc::new(RecordingRotate::default());
        let (window, _flush_tx, _cancel) = schedule(Duration::from_secs(3));
        let opened_at = window.opened_at;

        run_scheduler(Arc::downgrade(&target), window).await;

        let calls = target.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, 7);
        assert_eq!(calls[0].2, CloseReason::Duration);
        let elapsed = calls[0].3 - opened_at;
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_sub_second_duration() {
        let target = Arc::new(RecordingRotate::default());
        let (window, _flush_tx, _cancel) = schedule(Duration::from_millis(250));
        let opened_at = window.opened_at;

        run_scheduler(Arc::downgrade(&target), window).await;

        let calls = target.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let elapsed = calls[0].3 - opened_at;
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_flush_rotates_immediately() {
        let target = Arc::new(RecordingRotate::default());
        let (window, flush_tx, _cancel) = schedule(Duration::from_secs(3600));
        flush_tx.try_send(()).unwrap();

        run_scheduler(Arc::downgrade(&target), window).await;

        let calls = target.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, CloseReason::Flush);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_pending_flush_beats_cancellation() {
        let target = Arc::new(RecordingRotate::default());
        let (window, flush_tx, cancel) = schedule(Duration::from_secs(3600));
        flush_tx.try_send(()).unwrap();
        cancel.cancel();

        run_scheduler(Arc::downgrade(&target), window).await;

        let calls = target.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, CloseReason::Flush);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_cancellation_ends_without_rotation() {
        let target = Arc::new(RecordingRotate::default());
        let (window, _flush_tx, cancel) = schedule(Duration::from_secs(3600));
        cancel.cancel();

        run_scheduler(Arc::downgrade(&target), window).await;

        assert!(target.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_exits_when_target_dropped() {
        let target = Arc::new(RecordingRotate::default());
        let weak = Arc::downgrade(&target);
        drop(target);
        let (window, _flush_tx, _cancel) = schedule(Duration::from_secs(1));

        // Returns after the first expiry even though nothing can be rotated
        run_scheduler(weak, window).await;
    }
}
