//! FIFO queue of pending work items.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The future an executable produces.
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A unit of work. It receives the job's own cancellation token, which fires
/// on process shutdown or when the job is cancelled explicitly.
pub type Executable = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

/// Box a closure into an [`Executable`].
pub fn executable<F, Fut>(f: F) -> Executable
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |token: CancellationToken| -> JobFuture { Box::pin(f(token)) })
}

/// A queued, not-yet-started job.
///
/// Consumed exactly once by the worker; the job record outlives it.
pub struct WorkItem {
    pub id: Uuid,
    pub name: String,
    executable: Executable,
}

impl WorkItem {
    pub fn new(id: Uuid, name: impl Into<String>, executable: Executable) -> Self {
        Self {
            id,
            name: name.into(),
            executable,
        }
    }

    /// Hand the executable its token and get the future to drive.
    pub fn into_future(self, token: CancellationToken) -> JobFuture {
        (self.executable)(token)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Thread-safe FIFO of [`WorkItem`]s.
///
/// Pushing wakes a waiter in [`JobQueue::notified`], so the worker does not
/// have to sit out a full poll interval after an enqueue.
#[derive(Default)]
pub struct JobQueue {
    items: Mutex<VecDeque<WorkItem>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub fn push(&self, item: WorkItem) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
        self.notify.notify_one();
    }

    /// Non-blocking pop from the head.
    pub fn try_dequeue(&self) -> Option<WorkItem> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Whether a work item for `id` is still waiting.
    pub fn contains(&self, id: Uuid) -> bool {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next push (or immediately if a push happened since
    /// the last wake-up).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item(name: &str) -> WorkItem {
        WorkItem::new(Uuid::now_v7(), name, executable(|_| async { Ok(()) }))
    }

    #[test]
    fn dequeues_in_push_order() {
        let queue = JobQueue::new();
        queue.push(item("first"));
        queue.push(item("second"));
        queue.push(item("third"));

        let names: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|item| item.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn try_dequeue_on_empty_queue_is_none() {
        let queue = JobQueue::new();
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn contains_tracks_waiting_items() {
        let queue = JobQueue::new();
        let waiting = item("Sync");
        let id = waiting.id;
        queue.push(waiting);

        assert!(queue.contains(id));
        queue.try_dequeue();
        assert!(!queue.contains(id));
    }

    #[tokio::test]
    async fn push_before_wait_is_not_lost() {
        let queue = JobQueue::new();
        queue.push(item("Sync"));

        tokio::time::timeout(Duration::from_secs(1), queue.notified())
            .await
            .expect("stored permit should wake the waiter");
    }

    #[tokio::test]
    async fn work_item_receives_its_token() {
        let token = CancellationToken::new();
        token.cancel();
        let item = WorkItem::new(
            Uuid::now_v7(),
            "Sync",
            executable(|token| async move {
                anyhow::ensure!(token.is_cancelled(), "token not passed through");
                Ok(())
            }),
        );

        item.into_future(token).await.unwrap();
    }
}
