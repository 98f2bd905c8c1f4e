use crate::window::event::StreamKey;
use crate::window::types::Window;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Registry slot for one open window and the handles of its scheduler task
pub(crate) struct WindowEntry {
    pub window: Window,
    /// Distinguishes successive window instances under the same key
    pub generation: u64,
    /// Capacity 1: a full channel means a flush is already pending
    pub flush_tx: mpsc::Sender<()>,
    pub cancel: CancellationToken,
}

/// Mapping from stream key to its currently open window.
///
/// Every read, append and replacement goes through one exclusive lock. The
/// lock is never held across an await point or a processor call.
#[derive(Default)]
pub struct WindowRegistry {
    entries: Mutex<HashMap<StreamKey, WindowEntry>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the registry lock. A panic while the lock was held cannot leave
    /// an entry half-rotated, so a poisoned lock is recovered.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<StreamKey, WindowEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Id of the window currently open for `key`
    pub fn current_window_id(&self, key: &StreamKey) -> Option<String> {
        self.lock().get(key).map(|entry| entry.window.id().to_string())
    }
}
