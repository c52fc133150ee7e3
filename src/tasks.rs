//! Structured task group: every task spawned through a [`TaskGroup`] shares one
//! cancellation scope and is joined before [`TaskGroup::shutdown`] returns.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct TaskGroup {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskGroup {
    /// A group whose scope is cancelled together with `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: parent.child_token(),
        }
    }

    /// The group's cancellation scope; hand this to the spawned futures.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Tasks that have not exited yet
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for every task to exit without requesting cancellation.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancels the scope and joins every task.
    pub async fn shutdown(&self) {
        trace!("shutting down task group with {} live tasks", self.tracker.len());
        self.cancel.cancel();
        self.join().await;
    }
}
