//! Worker implementation for relayq.
//!
//! A worker repeatedly claims a task it is able to run, executes it with the
//! matching runner inside a trace session and submits the result. The loop
//! keeps going until the worker is stopped:
//!
//! - **Hard stop**: the cancellation token passed to [`Worker::run`] fires. A
//!   parked worker exits right away; a busy one finishes its task first.
//! - **Graceful stop**: [`Worker::graceful_stop`] was called. The in-flight
//!   task completes, then no further task is claimed.
//!
//! Runner failures and panics never end the loop; they become error results.

use crate::capability::{Capability, WorkerCapabilities, WorkerInfo};
use crate::core::registry::{RunnerContext, RunnerRegistry};
use crate::error::{RelayError, RelayResult};
use crate::queue::SharedQueue;
use crate::task::{FailureDetail, Task, TaskResult};
use crate::trace::TraceCollector;
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Phase of a worker's run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Holding no task
    Idle,
    /// Claiming or executing a task
    Busy,
    /// Graceful stop requested, finishing the current task
    Stopping,
    /// Run loop exited
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// Statistics about worker performance
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Number of tasks whose runner succeeded
    pub tasks_completed: u64,
    /// Number of tasks that produced an error result
    pub tasks_failed: u64,
    /// Average task execution time
    pub avg_task_duration: Option<Duration>,
}

/// Individual worker that processes tasks
pub struct Worker {
    info: WorkerInfo,
    extra_capabilities: Vec<Capability>,
    registry: RunnerRegistry,
    queue: SharedQueue,
    tracer: Arc<dyn TraceCollector>,
    idle: AtomicBool,
    stopping: AtomicBool,
    stopped: AtomicBool,
    stop_signal: Notify,
    stats: Mutex<WorkerStats>,
}

impl Worker {
    /// Create a new worker.
    ///
    /// `extra_capabilities` are offered on top of the synthetic tag of every
    /// runner in `registry`.
    pub fn new(
        info: WorkerInfo,
        extra_capabilities: Vec<Capability>,
        registry: RunnerRegistry,
        queue: SharedQueue,
        tracer: Arc<dyn TraceCollector>,
    ) -> Self {
        Self {
            info,
            extra_capabilities,
            registry,
            queue,
            tracer,
            idle: AtomicBool::new(true),
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    /// Worker identity
    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    /// Current capabilities, recomputed from the runner registry on every call.
    pub async fn capabilities(&self) -> WorkerCapabilities {
        let mut tags = self.registry.capabilities().await;
        tags.extend(self.extra_capabilities.iter().cloned());
        WorkerCapabilities::new(self.info.clone(), tags)
    }

    /// Current phase of the run loop
    pub fn state(&self) -> WorkerState {
        if self.is_stopped() {
            WorkerState::Stopped
        } else if self.is_stopping() {
            WorkerState::Stopping
        } else if self.is_idle() {
            WorkerState::Idle
        } else {
            WorkerState::Busy
        }
    }

    /// True while the worker holds no task
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    /// True once a graceful stop was requested and the loop hasn't exited yet
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// True once the run loop exited
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Get current worker statistics
    pub async fn stats(&self) -> WorkerStats {
        self.stats.lock().await.clone()
    }

    /// Finish the current task, then stop claiming.
    ///
    /// Has no effect on a stopped worker.
    pub fn graceful_stop(&self) {
        if self.is_stopped() {
            return;
        }
        if !self.stopping.swap(true, Ordering::SeqCst) {
            tracing::info!("Worker {} stopping after current task", self.info.name);
        }
        self.stop_signal.notify_waiters();
    }

    /// Run the worker loop until stopped.
    ///
    /// Returns `Ok(())` after a hard or graceful stop. Transport failures and
    /// fatal consistency failures ([`RelayError::DuplicateResult`],
    /// [`RelayError::MissingTraceData`]) end the loop with that error.
    pub async fn run(&self, cancel: &CancellationToken) -> RelayResult<()> {
        // A graceful stop racing the end of the previous run must not leak
        // into this one.
        self.stopping.store(false, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        tracing::info!("Worker {} ({}) started", self.info.name, self.info.id);

        let outcome = self.run_loop(cancel).await;

        self.idle.store(false, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);

        match &outcome {
            Ok(()) => tracing::info!("Worker {} stopped", self.info.name),
            Err(e) => tracing::error!("Worker {} failed: {}", self.info.name, e),
        }
        outcome
    }

    async fn run_loop(&self, cancel: &CancellationToken) -> RelayResult<()> {
        while !cancel.is_cancelled() && !self.is_stopping() {
            // Leave idle before claiming so a claimed task is never observed
            // as "queue empty and worker idle".
            self.idle.store(false, Ordering::SeqCst);

            let capabilities = self.capabilities().await;
            let Some(task) = self.queue.try_claim(&capabilities).await? else {
                self.idle.store(true, Ordering::SeqCst);

                // Registered before the re-check so a concurrent graceful stop
                // can't slip between the two.
                let stop_requested = self.stop_signal.notified();
                if self.is_stopping() {
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = stop_requested => {}
                    _ = self.queue.wait_for_change() => {}
                }
                continue;
            };

            let result = self.execute_task(task).await?;
            self.queue.submit_result(result).await?;
        }

        Ok(())
    }

    /// Execute a single task inside its own trace session.
    async fn execute_task(&self, task: Task) -> RelayResult<TaskResult> {
        tracing::debug!(
            "Worker {} executing task {} ({})",
            self.info.name,
            task.id,
            task.runner
        );

        let mut session = self.tracer.open(format!(
            "{}(on {}) - {}",
            task.runner, self.info.name, task.id
        ));
        session.associate("task_id", task.id.to_string());
        session.associate("worker_id", self.info.id.to_string());
        session.add_data("worker_name", json!(self.info.name));
        session.add_data("runner", json!(task.runner));
        session.add_data("priority", json!(task.priority));
        session.add_data("payload", task.payload.clone());
        session.add_data("queue_time_ms", json!(task.queue_time().as_millis() as u64));

        let start_time = Instant::now();
        let outcome = match self.registry.get(&task.runner).await {
            None => {
                let err = RelayError::UnknownRunner {
                    runner: task.runner.clone(),
                };
                Err(FailureDetail::new(err.kind(), err.to_string()))
            }
            Some(runner) => {
                let mut ctx = RunnerContext::new(&self.info, session.as_mut());
                match AssertUnwindSafe(runner.execute(&task, &mut ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(e)) => Err(FailureDetail::new("execution", e.to_string())),
                    Err(panic) => Err(FailureDetail::new("panic", panic_message(&*panic))),
                }
            }
        };
        let duration = start_time.elapsed();

        if let Err(detail) = &outcome {
            session.event(format!("{}: {}", detail.error, detail.message));
        }

        let trace = session
            .finish()
            .ok_or(RelayError::MissingTraceData { task_id: task.id })?;

        self.update_stats(outcome.is_ok(), duration).await;

        let result = match outcome {
            Ok(output) => {
                tracing::info!(
                    "Worker {} completed task {} in {:?}",
                    self.info.name,
                    task.id,
                    duration
                );
                TaskResult::success(task.id, output, trace)
            }
            Err(detail) => {
                tracing::warn!(
                    "Worker {} task {} failed: {}",
                    self.info.name,
                    task.id,
                    detail.message
                );
                TaskResult::failure(task.id, detail.to_payload(), trace)
            }
        };
        Ok(result)
    }

    /// Update worker statistics
    async fn update_stats(&self, succeeded: bool, duration: Duration) {
        let mut stats = self.stats.lock().await;

        if succeeded {
            stats.tasks_completed += 1;
        } else {
            stats.tasks_failed += 1;
        }

        // Simple moving average
        stats.avg_task_duration = Some(match stats.avg_task_duration {
            Some(avg) => (avg + duration) / 2,
            None => duration,
        });
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("info", &self.info)
            .field("extra_capabilities", &self.extra_capabilities)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Runner panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Runner panicked: {}", message)
    } else {
        "Runner panicked".to_string()
    }
}
