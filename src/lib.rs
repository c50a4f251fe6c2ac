//! # relayq
//!
//! A capability-aware task dispatch engine for Rust applications.
//!
//! ## Features
//!
//! - **Capability Routing**: Tasks only reach workers offering every tag they require
//! - **Priority Ordering**: Lower priority values first, ties broken by task id
//! - **Location Transparency**: Workers and producers talk to local or remote queues alike
//! - **Graceful Shutdown**: In-flight tasks always run to completion
//! - **Observability**: One trace session per executed task, built on `tracing`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relayq::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> RelayResult<()> {
//!     init_logging(&LoggingConfig::default())?;
//!
//!     let queue: SharedQueue = Arc::new(LocalQueue::new());
//!     let node = Arc::new(Node::new("local", 4, QueueFactory::shared(queue.clone()), Vec::new()));
//!     node.add_runner(AddRunner).await;
//!
//!     let running = Arc::clone(&node);
//!     tokio::spawn(async move { running.run().await });
//!
//!     let result = queue
//!         .enqueue_and_wait(
//!             TaskRequest::new("Add", json!({ "A": 1, "B": 2 })).priority(1),
//!             Duration::from_millis(100),
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("1 + 2 = {}", result.payload);
//!
//!     node.stop_on_idle().await
//! }
//! ```

pub mod capability;
pub mod config;
pub mod core;
pub mod error;
pub mod queue;
pub mod task;
pub mod trace;
pub mod utils;

#[cfg(feature = "remote")]
#[cfg_attr(docsrs, doc(cfg(feature = "remote")))]
pub mod remote;

pub mod prelude {
    pub use crate::capability::{Capability, WorkerCapabilities, WorkerInfo};
    pub use crate::config::*;
    pub use crate::core::{
        AddRunner, DelayRunner, EchoRunner, FnRunner, Node, RunnerContext, RunnerRegistry,
        TaskRunner, Worker, WorkerState,
    };
    pub use crate::error::{RelayError, RelayResult, RunnerError};
    pub use crate::queue::{LocalQueue, QueueFactory, SharedQueue, TaskQueue, TaskQueueExt};
    pub use crate::task::{Priority, Task, TaskId, TaskRequest, TaskResult};
    pub use crate::trace::{SpanCollector, TraceCollector, TraceMetadata, TraceSession};
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;

    #[cfg(feature = "remote")]
    #[cfg_attr(docsrs, doc(cfg(feature = "remote")))]
    pub use crate::remote::{QueueServer, RemoteQueue};
}

pub use crate::core::{Node, RunnerRegistry, TaskRunner, Worker};
pub use crate::error::{RelayError, RelayResult};
pub use crate::queue::{LocalQueue, TaskQueue, TaskQueueExt};
pub use crate::task::{Task, TaskId, TaskRequest, TaskResult};
pub use async_trait::async_trait;
