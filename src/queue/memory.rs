//! In-memory queue implementation for relayq.
//!
//! This backend keeps pending tasks in a priority heap and results in a map,
//! both behind a single mutex. Every mutating operation (claim scan, enqueue,
//! result submission) runs inside that one critical section, so two claims can
//! never hand out the same task and no enqueue racing a scan is lost.
//!
//! The lock is never held across a poll delay: blocking operations park on a
//! [`Notify`] (bounded by the poll interval) outside the lock.
//!
//! Nothing is persisted; the queue lives and dies with the process.

use super::TaskQueue;
use crate::capability::WorkerCapabilities;
use crate::config::QueueConfig;
use crate::error::{RelayError, RelayResult};
use crate::task::{Task, TaskId, TaskRequest, TaskResult};
use crate::utils::{Clock, MonotonicClock};
use async_trait::async_trait;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Heap entry ordered by claim order (priority, then id).
#[derive(Debug)]
struct Pending(Task);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.claim_order(&other.0)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    /// Min-heap of pending tasks
    pending: BinaryHeap<Reverse<Pending>>,
    /// Every id ever accepted, pending, in flight or completed
    issued: HashSet<TaskId>,
    /// Stored results
    completed: HashMap<TaskId, TaskResult>,
}

/// In-memory queue backend
#[derive(Debug)]
pub struct LocalQueue {
    state: Mutex<QueueState>,
    changed: Notify,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl LocalQueue {
    /// Create a new local queue with default configuration
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a new local queue with custom configuration
    pub fn with_config(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a new local queue measuring queue time with `clock`
    pub fn with_clock(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            changed: Notify::new(),
            clock,
            config,
        }
    }

    /// Number of pending tasks
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Number of stored results
    pub async fn completed_len(&self) -> usize {
        self.state.lock().await.completed.len()
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn is_empty(&self) -> RelayResult<bool> {
        Ok(self.state.lock().await.pending.is_empty())
    }

    async fn try_claim(&self, capabilities: &WorkerCapabilities) -> RelayResult<Option<Task>> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            return Ok(None);
        }

        let mut skipped = Vec::new();
        let mut claimed = None;

        while let Some(Reverse(Pending(task))) = state.pending.pop() {
            if task.can_run_on(capabilities) {
                claimed = Some(task);
                break;
            }
            skipped.push(task);
        }

        let skipped_count = skipped.len();
        for task in skipped {
            state.pending.push(Reverse(Pending(task)));
        }
        drop(state);

        let Some(mut task) = claimed else {
            if skipped_count > 0 {
                tracing::trace!(
                    worker = %capabilities.worker.name,
                    skipped = skipped_count,
                    "No eligible task for worker"
                );
            }
            return Ok(None);
        };

        task.queue_time = self.clock.now().saturating_sub(task.enqueued_at);

        tracing::debug!(
            task_id = %task.id,
            runner = %task.runner,
            worker = %capabilities.worker.name,
            skipped = skipped_count,
            queue_time_ms = task.queue_time.as_millis() as u64,
            "Claimed task"
        );
        Ok(Some(task))
    }

    async fn enqueue(&self, request: TaskRequest) -> RelayResult<TaskId> {
        let task = request.into_task(self.clock.now());
        let task_id = task.id;

        {
            let mut state = self.state.lock().await;
            if state.issued.contains(&task_id) || state.completed.contains_key(&task_id) {
                return Err(RelayError::DuplicateTask { task_id });
            }
            state.issued.insert(task_id);
            tracing::debug!(
                task_id = %task_id,
                runner = %task.runner,
                priority = task.priority,
                "Enqueued task"
            );
            state.pending.push(Reverse(Pending(task)));
        }

        self.changed.notify_waiters();
        Ok(task_id)
    }

    async fn submit_result(&self, result: TaskResult) -> RelayResult<()> {
        let task_id = result.task_id;

        {
            let mut state = self.state.lock().await;
            if state.completed.contains_key(&task_id) {
                tracing::error!(task_id = %task_id, "Result submitted twice, task ran more than once");
                return Err(RelayError::DuplicateResult { task_id });
            }
            if !state.issued.contains(&task_id) {
                tracing::warn!(task_id = %task_id, "Rejected result for a task this queue never saw");
                return Err(RelayError::UnknownTask { task_id });
            }
            tracing::debug!(task_id = %task_id, is_error = result.is_error, "Stored result");
            state.completed.insert(task_id, result);
        }

        self.changed.notify_waiters();
        Ok(())
    }

    async fn try_get_result(&self, task_id: TaskId) -> RelayResult<Option<TaskResult>> {
        Ok(self.state.lock().await.completed.get(&task_id).cloned())
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    async fn wait_for_change(&self) {
        let _ = tokio::time::timeout(self.poll_interval(), self.changed.notified()).await;
    }
}
