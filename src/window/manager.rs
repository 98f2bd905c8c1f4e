use crate::config::types::StreamConfig;
use crate::window::event::{RawEvent, StreamKey};
use crate::window::processor::WindowProcessor;
use crate::window::registry::{WindowEntry, WindowRegistry};
use crate::window::scheduler::{run_scheduler, CloseReason, Rotate, ScheduledWindow};
use crate::window::types::Window;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Closing policy shared by every key of one configured stream
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPolicy {
    pub name: String,
    pub context: String,
    pub duration: Duration,
    /// Close after this many events; 0 disables count-based closing
    pub max_events: usize,
}

impl From<&StreamConfig> for WindowPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self {
            name: config.name.clone(),
            context: config.context.clone(),
            duration: Duration::from_secs(config.window_duration_seconds),
            max_events: config.window_max_events,
        }
    }
}

/// Snapshot of one open window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStatus {
    pub stream_key: StreamKey,
    pub window_id: String,
    pub partition: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub event_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub events_ingested: u64,
    pub windows_opened: u64,
    pub windows_closed: u64,
    pub handoff_failures: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    events_ingested: AtomicU64,
    windows_opened: AtomicU64,
    windows_closed: AtomicU64,
    handoff_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            windows_opened: self.windows_opened.load(Ordering::Relaxed),
            windows_closed: self.windows_closed.load(Ordering::Relaxed),
            handoff_failures: self.handoff_failures.load(Ordering::Relaxed),
        }
    }
}

/// Owns the window registry for one configured stream, runs the rotation
/// protocol and hands closed windows to the processor.
///
/// Cloning is cheap and every clone drives the same registry.
#[derive(Clone)]
pub struct WindowManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    policy: WindowPolicy,
    registry: WindowRegistry,
    processor: Arc<dyn WindowProcessor>,
    runtime: Handle,
    /// Scheduler and hand-off tasks, awaited on shutdown
    tasks: TaskTracker,
    /// Parent of every scheduler's cancellation token
    shutdown: CancellationToken,
    next_generation: AtomicU64,
    stats: Arc<StatsCounters>,
    self_ref: Weak<ManagerInner>,
}

impl WindowManager {
    /// Create a manager bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(policy: WindowPolicy, processor: Arc<dyn WindowProcessor>) -> Self {
        Self::with_runtime(policy, processor, Handle::current())
    }

    pub fn with_runtime(
        policy: WindowPolicy,
        processor: Arc<dyn WindowProcessor>,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new_cyclic(|self_ref| ManagerInner {
            policy,
            registry: WindowRegistry::new(),
            processor,
            runtime,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_generation: AtomicU64::new(0),
            stats: Arc::new(StatsCounters::default()),
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.inner.policy
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.inner.registry
    }

    pub fn stats(&self) -> ManagerStats {
        self.inner.stats.snapshot()
    }

    /// Open a window for `key` at stream start. No-op if one is already open.
    pub fn open(&self, key: StreamKey, partition: i32) {
        let mut entries = self.inner.registry.lock();
        if let Entry::Vacant(slot) = entries.entry(key.clone()) {
            info!(
                stream = %self.inner.policy.name,
                stream_key = %key,
                partition = partition,
                "Starting window manager for stream"
            );
            slot.insert(self.inner.new_entry(key, partition, None));
        }
    }

    /// Append an event to the open window for its key, creating the window if
    /// needed. Rotates before returning when the event-count limit is reached.
    ///
    /// Never waits on the processor; blocks only on the registry lock.
    pub fn ingest(&self, event: RawEvent) {
        let inner = &self.inner;
        let key = event.stream_key.clone();
        let mut entries = inner.registry.lock();

        let entry = match entries.entry(key.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                debug!(stream_key = %key, partition = event.partition, "No open window for key, creating one");
                slot.insert(inner.new_entry(key.clone(), event.partition, None))
            }
        };

        entry.window.append(event);
        let count = entry.window.count();
        inner.stats.events_ingested.fetch_add(1, Ordering::Relaxed);

        let max_events = inner.policy.max_events;
        if max_events > 0 && count >= max_events {
            debug!(stream_key = %key, count = count, "Window reached max events");
            inner.rotate_locked(&mut entries, &key, CloseReason::MaxEvents);
        }
    }

    /// Ask every open window to close. Returns without waiting.
    ///
    /// A window that already has a flush pending keeps that single request.
    pub fn flush_all(&self) {
        let entries = self.inner.registry.lock();
        let mut requested = 0usize;

        for (key, entry) in entries.iter() {
            if entry.window.is_closed() {
                continue;
            }
            match entry.flush_tx.try_send(()) {
                Ok(()) => requested += 1,
                Err(TrySendError::Full(())) => {
                    debug!(stream_key = %key, "Flush already pending");
                }
                Err(TrySendError::Closed(())) => {
                    debug!(stream_key = %key, "Window scheduler already stopped");
                }
            }
        }

        info!(
            stream = %self.inner.policy.name,
            windows = requested,
            "Requested flush of open windows"
        );
    }

    /// Flush every open window, stop all scheduler tasks and wait up to
    /// `grace` for outstanding hand-offs.
    ///
    /// The event source must already be stopped. Windows created after this
    /// call are not closed by duration.
    pub async fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        self.flush_all();
        inner.shutdown.cancel();
        inner.tasks.close();

        match tokio::time::timeout(grace, inner.tasks.wait()).await {
            Ok(()) => info!(
                stream = %inner.policy.name,
                windows_closed = inner.stats.windows_closed.load(Ordering::Relaxed),
                "Window manager stopped"
            ),
            Err(_) => warn!(
                stream = %inner.policy.name,
                pending_tasks = inner.tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "Window hand-offs still running after grace period"
            ),
        }
    }

    /// Open windows, sorted by stream key
    pub fn snapshot(&self) -> Vec<WindowStatus> {
        let entries = self.inner.registry.lock();
        let mut windows: Vec<WindowStatus> = entries
            .values()
            .map(|entry| WindowStatus {
                stream_key: entry.window.stream_key().clone(),
                window_id: entry.window.id().to_string(),
                partition: entry.window.partition(),
                start_time: entry.window.start_time(),
                end_time: entry.window.end_time(),
                event_count: entry.window.count(),
            })
            .collect();
        drop(entries);

        windows.sort_by(|a, b| a.stream_key.cmp(&b.stream_key));
        windows
    }
}

impl ManagerInner {
    /// Build a registry entry for a fresh window and start its scheduler.
    ///
    /// `previous_start` is the start of the window being replaced; the new
    /// start is kept strictly later so window ids never repeat for a key.
    fn new_entry(
        &self,
        key: StreamKey,
        partition: i32,
        previous_start: Option<DateTime<Utc>>,
    ) -> WindowEntry {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut start_time = Utc::now();
        if let Some(previous) = previous_start {
            start_time = start_time.max(previous + chrono::Duration::nanoseconds(1));
        }
        let window = Window::new(key.clone(), partition, start_time, self.policy.context.clone());
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let cancel = self.shutdown.child_token();

        debug!(
            stream_key = %key,
            window_id = %window.id(),
            generation = generation,
            "Opened window"
        );

        let scheduled = ScheduledWindow {
            stream_key: key,
            generation,
            opened_at: Instant::now(),
            duration: self.policy.duration,
            flush_rx,
            cancel: cancel.clone(),
        };
        self.tasks
            .spawn_on(run_scheduler(self.self_ref.clone(), scheduled), &self.runtime);
        self.stats.windows_opened.fetch_add(1, Ordering::Relaxed);

        WindowEntry {
            window,
            generation,
            flush_tx,
            cancel,
        }
    }

    /// Close the open window for `key`, hand it off and install its
    /// replacement. Caller holds the registry lock.
    fn rotate_locked(
        &self,
        entries: &mut HashMap<StreamKey, WindowEntry>,
        key: &StreamKey,
        reason: CloseReason,
    ) {
        let Some(mut entry) = entries.remove(key) else {
            return;
        };

        entry.window.close(Utc::now());
        entry.cancel.cancel();
        self.stats.windows_closed.fetch_add(1, Ordering::Relaxed);

        info!(
            stream_key = %key,
            window_id = %entry.window.id(),
            events = entry.window.count(),
            reason = %reason,
            "Closing window"
        );

        let partition = entry.window.partition();
        let previous_start = entry.window.start_time();
        self.spawn_handoff(entry.window);
        entries.insert(
            key.clone(),
            self.new_entry(key.clone(), partition, Some(previous_start)),
        );
    }

    /// Run the processor for a closed window on a detached, tracked task.
    /// Failures and panics are logged and counted, never propagated.
    fn spawn_handoff(&self, window: Window) {
        let processor = Arc::clone(&self.processor);
        let stats = Arc::clone(&self.stats);

        self.tasks.spawn_on(
            async move {
                let result = AssertUnwindSafe(processor.process(&window))
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(())) => debug!(
                        stream_key = %window.stream_key(),
                        window_id = %window.id(),
                        "Window processed"
                    ),
                    Ok(Err(e)) => {
                        stats.handoff_failures.fetch_add(1, Ordering::Relaxed);
                        error!(
                            stream_key = %window.stream_key(),
                            window_id = %window.id(),
                            error = %e,
                            "Failed to process window"
                        );
                    }
                    Err(_) => {
                        stats.handoff_failures.fetch_add(1, Ordering::Relaxed);
                        error!(
                            stream_key = %window.stream_key(),
                            window_id = %window.id(),
                            "Window processor panicked"
                        );
                    }
                }
            },
            &self.runtime,
        );
    }
}

impl Rotate for ManagerInner {
    fn rotate(&self, key: &StreamKey, generation: u64, reason: CloseReason) -> bool {
        let mut entries = self.registry.lock();

        // The check and the close happen under the same lock, so of two
        // racing triggers only the first sees a matching open window.
        let is_current = entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation && !entry.window.is_closed());

        if !is_current {
            debug!(
                stream_key = %key,
                generation = generation,
                reason = %reason,
                "Window already rotated"
            );
            return false;
        }

        self.rotate_locked(&mut entries, key, reason);
        true
    }
}
