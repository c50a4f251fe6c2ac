//! Queue backends for relayq task dispatch.
//!
//! A [`TaskQueue`] is a capability-aware priority store plus a result store.
//! Two backends satisfy it:
//! - **Local**: [`LocalQueue`], an in-memory queue shared by co-located workers
//! - **Remote**: [`RemoteQueue`](crate::remote::RemoteQueue), an HTTP proxy to a
//!   [`QueueServer`](crate::remote::QueueServer) wrapping a `LocalQueue`
//!
//! Workers and producers only ever talk to the trait, so they behave the same
//! whichever backend sits behind it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use relayq::prelude::*;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> RelayResult<()> {
//! let queue = LocalQueue::new();
//! let cancel = CancellationToken::new();
//!
//! let result = queue
//!     .enqueue_and_wait(
//!         TaskRequest::new("Add", json!({ "A": 1, "B": 2 })),
//!         Duration::from_millis(100),
//!         &cancel,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::capability::WorkerCapabilities;
use crate::error::RelayResult;
use crate::task::{Task, TaskId, TaskRequest, TaskResult};
use crate::utils::poll_until;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod memory;
pub use memory::LocalQueue;

/// Trait that all queue backends must implement
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// True iff no task is pending. Stored results are ignored.
    async fn is_empty(&self) -> RelayResult<bool>;

    /// Claim the most urgent pending task the given capabilities can run.
    ///
    /// Non-blocking: returns `None` when nothing eligible is pending. Tasks
    /// skipped during the scan stay pending and untouched.
    async fn try_claim(&self, capabilities: &WorkerCapabilities) -> RelayResult<Option<Task>>;

    /// Enqueue a task and return its id.
    ///
    /// Fails with [`DuplicateTask`](crate::error::RelayError::DuplicateTask)
    /// if the id was already used on this queue.
    async fn enqueue(&self, request: TaskRequest) -> RelayResult<TaskId>;

    /// Store the result of an executed task.
    ///
    /// Fails with [`DuplicateResult`](crate::error::RelayError::DuplicateResult)
    /// if a result for the same task is already stored; the stored result is
    /// left untouched. Fails with
    /// [`UnknownTask`](crate::error::RelayError::UnknownTask) if the task was
    /// never enqueued on this queue.
    async fn submit_result(&self, result: TaskResult) -> RelayResult<()>;

    /// Fetch a stored result without blocking.
    async fn try_get_result(&self, task_id: TaskId) -> RelayResult<Option<TaskResult>>;

    /// Interval between polls of the blocking operations.
    fn poll_interval(&self) -> Duration;

    /// Park until the queue may have changed.
    ///
    /// Waits at most one poll interval. Backends that can observe changes
    /// return earlier.
    async fn wait_for_change(&self) {
        tokio::time::sleep(self.poll_interval()).await;
    }

    /// Block until a task can be claimed, or `cancel` fires.
    async fn wait_for_task(
        &self,
        capabilities: &WorkerCapabilities,
        cancel: &CancellationToken,
    ) -> RelayResult<Task> {
        poll_until(
            cancel,
            || self.try_claim(capabilities),
            || self.wait_for_change(),
        )
        .await
    }

    /// Block until the result of `task_id` is stored, or `cancel` fires.
    async fn get_result(
        &self,
        task_id: TaskId,
        cancel: &CancellationToken,
    ) -> RelayResult<TaskResult> {
        poll_until(
            cancel,
            || self.try_get_result(task_id),
            || self.wait_for_change(),
        )
        .await
    }
}

/// Producer-side combinators available on every queue.
#[async_trait]
pub trait TaskQueueExt: TaskQueue {
    /// Enqueue `request` and poll every `poll_interval` until its result is stored.
    ///
    /// Fails with [`Cancelled`](crate::error::RelayError::Cancelled) when
    /// `cancel` fires first; the task itself stays enqueued.
    async fn enqueue_and_wait(
        &self,
        request: TaskRequest,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> RelayResult<TaskResult> {
        let task_id = self.enqueue(request).await?;
        tracing::debug!(task_id = %task_id, "Waiting for result");

        poll_until(
            cancel,
            || self.try_get_result(task_id),
            || tokio::time::sleep(poll_interval),
        )
        .await
    }
}

impl<Q: TaskQueue + ?Sized> TaskQueueExt for Q {}

/// Shared handle to any queue backend
pub type SharedQueue = Arc<dyn TaskQueue>;

/// Produces the queue handle each worker of a node talks to.
///
/// The factory is called with `Some(index)` for the worker at `index` and
/// with `None` for the node's own view of the queue.
#[derive(Clone)]
pub struct QueueFactory {
    make: Arc<dyn Fn(Option<usize>) -> SharedQueue + Send + Sync>,
}

impl QueueFactory {
    /// Build queue handles with a closure
    pub fn from_fn<F>(make: F) -> Self
    where
        F: Fn(Option<usize>) -> SharedQueue + Send + Sync + 'static,
    {
        Self {
            make: Arc::new(make),
        }
    }

    /// Hand the same queue to the node and every worker
    pub fn shared(queue: SharedQueue) -> Self {
        Self::from_fn(move |_| Arc::clone(&queue))
    }

    /// Give the node and every worker its own client to a queue server
    #[cfg(feature = "remote")]
    #[cfg_attr(docsrs, doc(cfg(feature = "remote")))]
    pub fn remote(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self::from_fn(move |_| Arc::new(crate::remote::RemoteQueue::new(base_url.clone())))
    }

    /// Produce the queue for `index` (`None` for the node's own view)
    pub fn create(&self, index: Option<usize>) -> SharedQueue {
        (self.make)(index)
    }
}

impl fmt::Debug for QueueFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFactory").finish_non_exhaustive()
    }
}
