//! Main-thread and failure-log fakes

use std::thread::{self, ThreadId};

use ownerkit_core::effects::{FailureLog, MainThreadEffects, MainThreadTask};
use parking_lot::Mutex;

/// Main thread that runs posted tasks immediately, on the posting thread
#[derive(Default)]
pub struct InlineMainThread {
    posted: Mutex<usize>,
}

impl InlineMainThread {
    /// No tasks posted yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks posted
    pub fn posted(&self) -> usize {
        *self.posted.lock()
    }
}

impl MainThreadEffects for InlineMainThread {
    fn post(&self, task: MainThreadTask) {
        *self.posted.lock() += 1;
        task();
    }
}

/// Main thread that queues tasks until the test drains them
#[derive(Default)]
pub struct QueuedMainThread {
    queue: Mutex<Vec<(ThreadId, MainThreadTask)>>,
}

impl QueuedMainThread {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks waiting to run
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Threads each queued task was posted from
    pub fn posting_threads(&self) -> Vec<ThreadId> {
        self.queue.lock().iter().map(|(id, _)| *id).collect()
    }

    /// Run every queued task on the calling thread; returns how many ran
    pub fn drain(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.queue.lock());
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }
}

impl MainThreadEffects for QueuedMainThread {
    fn post(&self, task: MainThreadTask) {
        self.queue.lock().push((thread::current().id(), task));
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    /// Component tag
    pub tag: String,
    /// Message
    pub message: String,
}

/// Failure log that keeps every entry
#[derive(Default)]
pub struct RecordingFailureLog {
    entries: Mutex<Vec<FailureEntry>>,
}

impl RecordingFailureLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry recorded
    pub fn entries(&self) -> Vec<FailureEntry> {
        self.entries.lock().clone()
    }

    /// Number of entries recorded
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Nothing recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether some entry's message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }
}

impl FailureLog for RecordingFailureLog {
    fn record(&self, tag: &str, message: &str) {
        tracing::debug!(tag, message, "failure recorded");
        self.entries.lock().push(FailureEntry {
            tag: tag.to_string(),
            message: message.to_string(),
        });
    }
}
