//! Task and result definitions.

use crate::capability::{Capability, WorkerCapabilities};
use crate::trace::TraceMetadata;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Task priority. Lower values are more urgent.
pub type Priority = i32;

/// Everything a producer supplies when enqueueing work.
///
/// # Examples
///
/// ```rust
/// use relayq::task::TaskRequest;
/// use serde_json::json;
///
/// let request = TaskRequest::new("Add", json!({ "A": 1, "B": 2 }))
///     .priority(1)
///     .require("relayq/pool/high");
/// assert!(request.id.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Caller-chosen id; generated at enqueue time when absent
    pub id: Option<TaskId>,
    /// Name of the runner that executes the task
    pub runner: String,
    /// Scheduling priority
    pub priority: Priority,
    /// Opaque task payload
    pub payload: serde_json::Value,
    /// Extra tags the executing worker must offer
    pub extra_capabilities: Vec<Capability>,
}

impl TaskRequest {
    /// Start a request with priority 0 and no extra capabilities
    pub fn new(runner: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            runner: runner.into(),
            priority: 0,
            payload,
            extra_capabilities: Vec::new(),
        }
    }

    /// Use an explicit task id
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the priority
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Require an extra capability
    pub fn require(mut self, capability: impl Into<Capability>) -> Self {
        self.extra_capabilities.push(capability.into());
        self
    }

    /// Require several extra capabilities
    pub fn require_all<I, C>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.extra_capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Turn the request into a task stamped at `enqueued_at`
    pub fn into_task(self, enqueued_at: Duration) -> Task {
        Task {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            runner: self.runner,
            priority: self.priority,
            payload: self.payload,
            extra_capabilities: self.extra_capabilities,
            enqueued_at,
            queue_time: Duration::ZERO,
        }
    }
}

/// An immutable unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Name of the runner that executes the task
    pub runner: String,
    /// Scheduling priority
    pub priority: Priority,
    /// Opaque task payload
    pub payload: serde_json::Value,
    /// Extra tags the executing worker must offer
    pub extra_capabilities: Vec<Capability>,
    /// Reading of the owning queue's clock when the task was enqueued
    pub enqueued_at: Duration,
    pub(crate) queue_time: Duration,
}

impl Task {
    /// Time the task spent pending, measured by the queue when it was claimed
    pub fn queue_time(&self) -> Duration {
        self.queue_time
    }

    /// The synthetic runner tag plus every extra tag
    pub fn required_capabilities(&self) -> Vec<Capability> {
        let mut required = Vec::with_capacity(self.extra_capabilities.len() + 1);
        required.push(Capability::runner(&self.runner));
        required.extend(self.extra_capabilities.iter().cloned());
        required
    }

    /// Whether a worker offering `capabilities` may execute this task
    pub fn can_run_on(&self, capabilities: &WorkerCapabilities) -> bool {
        capabilities.offers(&Capability::runner(&self.runner))
            && capabilities.satisfies(&self.extra_capabilities)
    }

    /// Claim ordering: priority first, then id
    pub fn claim_order(&self, other: &Task) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Outcome of executing a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    /// The task this result belongs to
    pub task_id: TaskId,
    /// Whether the runner failed
    pub is_error: bool,
    /// Runner output, or a description of the failure
    pub payload: serde_json::Value,
    /// Trace metadata of the execution
    pub trace: TraceMetadata,
}

impl TaskResult {
    /// A successful result
    pub fn success(task_id: TaskId, payload: serde_json::Value, trace: TraceMetadata) -> Self {
        Self {
            task_id,
            is_error: false,
            payload,
            trace,
        }
    }

    /// A failed result; `payload` describes the failure
    pub fn failure(task_id: TaskId, payload: serde_json::Value, trace: TraceMetadata) -> Self {
        Self {
            task_id,
            is_error: true,
            payload,
            trace,
        }
    }

    /// Decode a successful payload into `T`
    pub fn output<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Failure description stored in the payload of an error result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Machine-readable failure kind
    pub error: String,
    /// Human-readable description
    pub message: String,
}

impl FailureDetail {
    /// Create a failure detail
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Render as a result payload
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.error, "message": self.message })
    }
}
