/// Window lifecycle tests: closing by count and by duration, flushing,
/// shutdown, rotation races and processor isolation.
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamrag::window::{
    ProcessorError, RawEvent, StreamKey, Window, WindowManager, WindowPolicy, WindowProcessor,
};
use tokio::time::Instant;

/// Keeps every window it is handed, with the (tokio) time of the call
#[derive(Default)]
struct Recorder {
    windows: Mutex<Vec<(Window, Instant)>>,
}

impl Recorder {
    fn windows(&self) -> Vec<Window> {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .map(|(w, _)| w.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    fn non_empty_counts(&self) -> Vec<usize> {
        let mut counts: Vec<usize> = self
            .windows()
            .iter()
            .map(Window::count)
            .filter(|&c| c > 0)
            .collect();
        counts.sort_unstable();
        counts
    }
}

#[async_trait]
impl WindowProcessor for Recorder {
    async fn process(&self, window: &Window) -> Result<(), ProcessorError> {
        self.windows
            .lock()
            .unwrap()
            .push((window.clone(), Instant::now()));
        Ok(())
    }
}

/// Never finishes
struct StuckProcessor {
    started: AtomicUsize,
}

#[async_trait]
impl WindowProcessor for StuckProcessor {
    async fn process(&self, _window: &Window) -> Result<(), ProcessorError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

struct FailingProcessor;

#[async_trait]
impl WindowProcessor for FailingProcessor {
    async fn process(&self, _window: &Window) -> Result<(), ProcessorError> {
        Err(ProcessorError::Other("index unavailable".to_string()))
    }
}

struct PanickingProcessor;

#[async_trait]
impl WindowProcessor for PanickingProcessor {
    async fn process(&self, window: &Window) -> Result<(), ProcessorError> {
        panic!("cannot handle window {}", window.id());
    }
}

fn policy(duration: Duration, max_events: usize) -> WindowPolicy {
    WindowPolicy {
        name: "financial_transactions".to_string(),
        context: "Financial transactions".to_string(),
        duration,
        max_events,
    }
}

fn make_event(key: &StreamKey, offset: i64) -> RawEvent {
    RawEvent {
        stream_key: key.clone(),
        partition: 0,
        offset,
        key: Vec::new(),
        value: format!(r#"{{"amount":{}}}"#, offset).into_bytes(),
        timestamp: Utc::now(),
    }
}

/// Let spawned tasks run without advancing the clock
async fn settle() {
    for _ in 0..1000 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_threshold_closes_window_with_exact_count() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 3), recorder.clone());
    let key = StreamKey::new("financial_transactions", 0);

    for offset in 0..3 {
        manager.ingest(make_event(&key, offset));
    }
    settle().await;

    let windows = recorder.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].count(), 3);
    assert!(windows[0].is_closed());

    // A fresh empty window is already open
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_count, 0);
    assert_ne!(snapshot[0].window_id, windows[0].id());

    // Two more events stay open until shutdown flushes them
    manager.ingest(make_event(&key, 3));
    manager.ingest(make_event(&key, 4));
    settle().await;
    assert_eq!(recorder.len(), 1);

    manager.shutdown(Duration::from_secs(1)).await;
    assert_eq!(recorder.non_empty_counts(), vec![2, 3]);
}

#[tokio::test]
async fn test_threshold_of_three_hands_off_events_in_order() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 3), recorder.clone());
    let key = StreamKey::new("financial_transactions", 0);

    for offset in 1..=3 {
        manager.ingest(make_event(&key, offset));
    }
    settle().await;

    let windows = recorder.windows();
    assert_eq!(windows.len(), 1);
    let offsets: Vec<i64> = windows[0].events().iter().map(|e| e.offset).collect();
    assert_eq!(offsets, vec![1, 2, 3]);

    // The fourth event goes into the replacement window
    manager.ingest(make_event(&key, 4));
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_count, 1);
    assert_ne!(snapshot[0].window_id, windows[0].id());
    assert_eq!(recorder.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_second_window_without_count_limit() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(1), 0), recorder.clone());
    let key = StreamKey::new("financial_transactions", 0);

    manager.ingest(make_event(&key, 1));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    settle().await;

    let windows = recorder.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].count(), 1);
    assert_eq!(windows[0].events()[0].offset, 1);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].event_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_duration_closes_window_within_bound() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(1), 100), recorder.clone());
    let key = StreamKey::new("financial_transactions", 0);

    let opened_at = Instant::now();
    manager.ingest(make_event(&key, 0));
    manager.ingest(make_event(&key, 1));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    settle().await;

    let calls = recorder.windows.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.count(), 2);
    let elapsed = calls[0].1 - opened_at;
    assert!(elapsed >= Duration::from_secs(1), "closed early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(1100), "closed late: {:?}", elapsed);

    // The replacement window is open and empty
    assert_eq!(manager.snapshot()[0].event_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_window_still_closes_on_duration() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(2), 0), recorder.clone());
    let key = StreamKey::new("financial_transactions", 0);

    manager.open(key.clone(), 0);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    settle().await;

    let windows = recorder.windows();
    assert_eq!(windows.len(), 1);
    assert!(windows[0].is_empty());
    assert!(windows[0]
        .summarize()
        .ends_with("No events in this window."));
}

#[tokio::test]
async fn test_flush_all_closes_every_open_window() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 0), recorder.clone());
    let orders = StreamKey::new("orders", 0);
    let payments = StreamKey::new("payments", 1);

    manager.ingest(make_event(&orders, 0));
    manager.ingest(make_event(&payments, 0));
    let before: HashSet<String> = manager.snapshot().into_iter().map(|w| w.window_id).collect();

    manager.flush_all();
    // Repeated requests while one is pending are dropped
    manager.flush_all();
    settle().await;

    let flushed: HashSet<String> = recorder
        .windows()
        .iter()
        .map(|w| w.id().to_string())
        .collect();
    assert!(before.is_subset(&flushed));

    for status in manager.snapshot() {
        assert!(!before.contains(&status.window_id));
    }
    assert_eq!(manager.stats().windows_closed as usize, recorder.len());
}

#[tokio::test]
async fn test_every_event_lands_in_exactly_one_window() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 4), recorder.clone());
    let keys = [StreamKey::new("orders", 0), StreamKey::new("orders", 1)];

    for offset in 0..50 {
        for key in &keys {
            manager.ingest(make_event(key, offset));
        }
    }
    manager.shutdown(Duration::from_secs(1)).await;

    for key in &keys {
        let mut offsets: Vec<i64> = recorder
            .windows()
            .iter()
            .filter(|w| w.stream_key() == key)
            .flat_map(|w| w.events().iter().map(|e| e.offset).collect::<Vec<_>>())
            .collect();
        offsets.sort_unstable();
        assert_eq!(offsets, (0..50).collect::<Vec<_>>());
    }

    // Within a window events keep ingest order
    for window in recorder.windows() {
        let offsets: Vec<i64> = window.events().iter().map(|e| e.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
        assert!(window.count() <= 4);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_threshold_and_timer_close_each_window_once() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_millis(20), 7), recorder.clone());
    let key = StreamKey::new("orders", 0);
    let per_thread = 2_000;

    // Ingest from plain threads, racing the duration timers
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let manager = manager.clone();
            let key = key.clone();
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    manager.ingest(make_event(&key, (t * per_thread + i) as i64));
                    if i % 200 == 0 {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    manager.shutdown(Duration::from_secs(5)).await;

    let windows = recorder.windows();
    let ids: HashSet<&str> = windows.iter().map(Window::id).collect();
    assert_eq!(ids.len(), windows.len(), "a window was processed twice");

    let total: usize = windows.iter().map(Window::count).sum();
    assert_eq!(total, 4 * per_thread);
    assert!(windows.iter().all(|w| w.count() <= 7));
    assert_eq!(manager.stats().events_ingested, (4 * per_thread) as u64);
}

#[tokio::test]
async fn test_ingest_does_not_wait_for_slow_processor() {
    let processor = Arc::new(StuckProcessor {
        started: AtomicUsize::new(0),
    });
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 1), processor.clone());
    let key = StreamKey::new("orders", 0);

    let started = std::time::Instant::now();
    for offset in 0..200 {
        manager.ingest(make_event(&key, offset));
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    settle().await;
    assert_eq!(processor.started.load(Ordering::SeqCst), 200);

    // Shutdown gives up on the stuck hand-offs after the grace period
    let started = std::time::Instant::now();
    manager.shutdown(Duration::from_millis(100)).await;
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_processor_failures_are_counted_not_propagated() {
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 2), Arc::new(FailingProcessor));
    let key = StreamKey::new("orders", 0);

    for offset in 0..6 {
        manager.ingest(make_event(&key, offset));
    }
    settle().await;

    let stats = manager.stats();
    assert_eq!(stats.windows_closed, 3);
    assert_eq!(stats.handoff_failures, 3);
    // Ingestion continues normally
    manager.ingest(make_event(&key, 6));
    assert_eq!(manager.snapshot()[0].event_count, 1);
}

#[tokio::test]
async fn test_processor_panic_is_contained() {
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 1), Arc::new(PanickingProcessor));
    let key = StreamKey::new("orders", 0);

    manager.ingest(make_event(&key, 0));
    manager.ingest(make_event(&key, 1));
    settle().await;

    assert_eq!(manager.stats().handoff_failures, 2);
    manager.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_windows_are_independent_per_key() {
    let recorder = Arc::new(Recorder::default());
    let manager = WindowManager::new(policy(Duration::from_secs(3600), 2), recorder.clone());
    let orders = StreamKey::new("orders", 0);
    let payments = StreamKey::new("payments", 0);

    manager.ingest(make_event(&orders, 0));
    manager.ingest(make_event(&payments, 0));
    manager.ingest(make_event(&orders, 1));
    settle().await;

    let windows = recorder.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].stream_key(), &orders);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 2);
    // Sorted by key
    assert_eq!(snapshot[0].stream_key, orders);
    assert_eq!(snapshot[0].event_count, 0);
    assert_eq!(snapshot[1].stream_key, payments);
    assert_eq!(snapshot[1].event_count, 1);
}
