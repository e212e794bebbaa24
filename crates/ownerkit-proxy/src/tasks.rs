//! Thread placement for privileged work
//!
//! Binder transactions and stream copies block, so async hosts run them on
//! the blocking pool with [`offload`]. Broker callbacks that must land on
//! the UI-owning thread go through a [`MainThreadQueue`], drained by
//! whichever task owns that thread.

use ownerkit_core::effects::{MainThreadEffects, MainThreadTask};
use ownerkit_core::{ProxyError, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Run blocking proxy work off the async executor
pub async fn offload<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProxyError::internal(format!("offloaded task failed: {e}")))?
}

/// Sending side of the main-thread queue
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: UnboundedSender<MainThreadTask>,
}

impl MainThreadEffects for MainThreadHandle {
    fn post(&self, task: MainThreadTask) {
        if self.tx.send(task).is_err() {
            tracing::warn!("main-thread queue closed; task dropped");
        }
    }
}

/// Receiving side of the main-thread queue
pub struct MainThreadQueue {
    rx: UnboundedReceiver<MainThreadTask>,
}

impl MainThreadQueue {
    /// Create a connected handle and queue
    pub fn channel() -> (MainThreadHandle, MainThreadQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MainThreadHandle { tx }, MainThreadQueue { rx })
    }

    /// Run every task queued so far; returns how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks until every handle is dropped
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn offload_returns_the_work_result() {
        let value = offload(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);

        let err = offload::<(), _>(|| Err(ProxyError::transaction("dead object")))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Transaction { .. }));
    }

    #[tokio::test]
    async fn offload_reports_panics_as_internal_errors() {
        let err = offload::<(), _>(|| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Internal { .. }));
    }

    #[test]
    fn posted_tasks_run_only_when_drained() {
        let (handle, mut queue) = MainThreadQueue::channel();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            handle.post(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(queue.run_pending(), 0);
    }

    #[tokio::test]
    async fn run_drains_until_handles_drop() {
        let (handle, queue) = MainThreadQueue::channel();
        let count = Arc::new(AtomicUsize::new(0));
        let worker = std::thread::spawn({
            let count = Arc::clone(&count);
            move || {
                let count = Arc::clone(&count);
                handle.post(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }));
            }
        });
        worker.join().unwrap();
        queue.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn post_after_queue_drop_is_harmless() {
        let (handle, queue) = MainThreadQueue::channel();
        drop(queue);
        handle.post(Box::new(|| {}));
    }
}
