//! Wire types shared by [`QueueServer`](super::QueueServer) and
//! [`RemoteQueue`](super::RemoteQueue).
//!
//! All bodies are JSON with camelCase field names.

use crate::capability::{Capability, WorkerCapabilities, WorkerInfo};
use crate::error::RelayError;
use crate::task::{Priority, Task, TaskId, TaskRequest, TaskResult};
use crate::trace::TraceMetadata;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// `GET`: whether the queue has no pending task. Body: `true`/`false`.
pub const IS_EMPTY: &str = "/queue/isEmpty";
/// `POST` [`CapabilitiesDto`]: claim a task. `200` with a [`TaskDto`], `204` if none.
pub const WAIT_FOR_TASK: &str = "/queue/waitForTask";
/// `POST` [`TaskDto`]: enqueue a task.
pub const ENQUEUE: &str = "/queue/enqueue";
/// `POST` [`ResultDto`]: store a result.
pub const SUBMIT_RESULT: &str = "/queue/submitResult";
/// `GET /queue/getResult/{taskId}`: `200` with a [`ResultDto`], `204` if not stored yet.
pub const GET_RESULT: &str = "/queue/getResult";

/// A task on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    /// Task id, chosen by the producer
    pub id: TaskId,
    /// Name of the runner that executes the task
    pub runner_name: String,
    /// Runner arguments
    pub payload: serde_json::Value,
    /// Lower values are claimed first
    #[serde(default)]
    pub priority: Priority,
    /// Tags required on top of the runner tag
    #[serde(default)]
    pub extra_capabilities: Vec<Capability>,
    /// Set by the server on claimed tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_time_ms: Option<u64>,
}

impl TaskDto {
    /// Rebuild the request the producer made
    pub fn into_request(self) -> TaskRequest {
        TaskRequest {
            id: Some(self.id),
            runner: self.runner_name,
            priority: self.priority,
            payload: self.payload,
            extra_capabilities: self.extra_capabilities,
        }
    }

    /// Rebuild a claimed task on the client side.
    ///
    /// The enqueue time belongs to the server's clock, so only the measured
    /// queue time survives the trip.
    pub fn into_task(self) -> Task {
        let queue_time = Duration::from_millis(self.queue_time_ms.unwrap_or_default());
        let mut task = self.into_request().into_task(Duration::ZERO);
        task.queue_time = queue_time;
        task
    }
}

impl From<TaskRequest> for TaskDto {
    fn from(request: TaskRequest) -> Self {
        Self {
            id: request.id.unwrap_or_else(Uuid::new_v4),
            runner_name: request.runner,
            payload: request.payload,
            priority: request.priority,
            extra_capabilities: request.extra_capabilities,
            queue_time_ms: None,
        }
    }
}

impl From<&Task> for TaskDto {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            runner_name: task.runner.clone(),
            payload: task.payload.clone(),
            priority: task.priority,
            extra_capabilities: task.extra_capabilities.clone(),
            queue_time_ms: Some(task.queue_time().as_millis() as u64),
        }
    }
}

/// A result on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDto {
    /// Task the result belongs to
    pub task_id: TaskId,
    /// True if the runner failed
    pub is_error: bool,
    /// Runner output, or the failure description
    pub payload: serde_json::Value,
    /// Trace of the execution; a result without one is rejected
    pub trace_metadata: TraceMetadata,
}

impl From<TaskResult> for ResultDto {
    fn from(result: TaskResult) -> Self {
        Self {
            task_id: result.task_id,
            is_error: result.is_error,
            payload: result.payload,
            trace_metadata: result.trace,
        }
    }
}

impl From<ResultDto> for TaskResult {
    fn from(dto: ResultDto) -> Self {
        Self {
            task_id: dto.task_id,
            is_error: dto.is_error,
            payload: dto.payload,
            trace: dto.trace_metadata,
        }
    }
}

/// Worker capabilities on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesDto {
    /// Claiming worker's id
    pub worker_id: Uuid,
    /// Claiming worker's name
    pub worker_name: String,
    /// Every tag the worker offers
    pub capabilities: Vec<Capability>,
}

impl From<&WorkerCapabilities> for CapabilitiesDto {
    fn from(caps: &WorkerCapabilities) -> Self {
        Self {
            worker_id: caps.worker.id,
            worker_name: caps.worker.name.clone(),
            capabilities: caps.capabilities.iter().cloned().collect(),
        }
    }
}

impl From<CapabilitiesDto> for WorkerCapabilities {
    fn from(dto: CapabilitiesDto) -> Self {
        WorkerCapabilities::new(WorkerInfo::new(dto.worker_id, dto.worker_name), dto.capabilities)
    }
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable kind, see [`RelayError::kind`]
    pub error: String,
    /// Human-readable description
    pub message: String,
}

impl From<&RelayError> for ErrorResponse {
    fn from(err: &RelayError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
