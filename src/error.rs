//! Error types for relayq operations.

use crate::task::TaskId;
use thiserror::Error;

/// Result type used throughout relayq.
pub type RelayResult<T> = Result<T, RelayError>;

/// Main error type for relayq operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A blocking wait was cancelled before it could complete
    #[error("Operation was cancelled")]
    Cancelled,

    /// No runner is registered under the task's runner name
    #[error("No task runner registered for '{runner}'")]
    UnknownRunner {
        /// The runner name that wasn't found
        runner: String,
    },

    /// A second result was submitted for the same task
    #[error("A result for task {task_id} was already submitted")]
    DuplicateResult {
        /// The task that was executed more than once
        task_id: TaskId,
    },

    /// A task with the same id was already enqueued
    #[error("Task {task_id} was already enqueued")]
    DuplicateTask {
        /// The colliding task id
        task_id: TaskId,
    },

    /// A result was submitted for a task this queue never accepted
    #[error("Task {task_id} was never enqueued")]
    UnknownTask {
        /// The id carried by the stray result
        task_id: TaskId,
    },

    /// A remote call failed or returned an unexpected status
    #[error("Transport failure: {message}")]
    Transport {
        /// Error message
        message: String,
        /// HTTP status, when the server answered at all
        status: Option<u16>,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The tracing collaborator finished without producing metadata
    #[error("Trace session for task {task_id} produced no metadata")]
    MissingTraceData {
        /// The task whose trace session was lost
        task_id: TaskId,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Runner execution failed
    #[error("Task execution failed: {message}")]
    Execution {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error (config files, listeners)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Create a transport error for an unexpected response status
    pub fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            status,
            source: None,
        }
    }

    /// Create a transport error wrapping a lower-level failure
    pub fn transport_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a task execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for the recoverable "wait was cancelled" case.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for queue consistency failures that must stop the worker that hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DuplicateResult { .. }
                | Self::UnknownTask { .. }
                | Self::MissingTraceData { .. }
        )
    }

    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::UnknownRunner { .. } => "unknown_runner",
            Self::DuplicateResult { .. } => "duplicate_result",
            Self::DuplicateTask { .. } => "duplicate_task",
            Self::UnknownTask { .. } => "unknown_task",
            Self::Transport { .. } => "transport",
            Self::MissingTraceData { .. } => "missing_trace_data",
            Self::Serialization(_) => "serialization",
            Self::Config { .. } => "config",
            Self::Execution { .. } => "execution",
            Self::Io(_) => "io",
        }
    }
}

/// Failure raised by a runner while executing a task.
///
/// Never escapes the worker: it is folded into an error result.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RunnerError {
    /// Error message
    pub message: String,
    /// Optional underlying error
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RunnerError {
    /// Create a runner error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a runner error wrapping an underlying error
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(format!("Invalid task payload: {}", err), err)
    }
}

impl From<RelayError> for RunnerError {
    fn from(err: RelayError) -> Self {
        Self::with_source(err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_fatal_classification() {
        let id = Uuid::new_v4();
        assert!(RelayError::DuplicateResult { task_id: id }.is_fatal());
        assert!(RelayError::MissingTraceData { task_id: id }.is_fatal());
        assert!(RelayError::UnknownTask { task_id: id }.is_fatal());
        assert_eq!(RelayError::UnknownTask { task_id: id }.kind(), "unknown_task");
        assert!(!RelayError::Cancelled.is_fatal());
        assert!(RelayError::Cancelled.is_cancelled());
        assert!(!RelayError::DuplicateTask { task_id: id }.is_fatal());
    }

    #[test]
    fn test_runner_error_from_payload_error() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let runner_err = RunnerError::from(err);
        assert!(runner_err.message.starts_with("Invalid task payload"));
        assert!(std::error::Error::source(&runner_err).is_some());
    }
}
