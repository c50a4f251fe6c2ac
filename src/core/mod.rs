//! Node orchestration for relayq.
//!
//! A [`Node`] owns a pool of [`Worker`]s, the [`RunnerRegistry`] they share and
//! its own view of the task queue. The pool is built either from a plain
//! worker count or from a [`NodeConfig`] with named worker groups, and is
//! controlled as a whole: run, hard stop, graceful stop, and wait for idle.

use crate::capability::{Capability, WorkerInfo};
use crate::config::{NodeConfig, WorkerGroupConfig};
use crate::error::{RelayError, RelayResult};
use crate::queue::{QueueFactory, SharedQueue};
use crate::task::Task;
use crate::trace::{SpanCollector, TraceCollector};
use crate::utils::cancellable_sleep;
use futures::future::join_all;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod registry;
pub mod worker;

pub use registry::{
    AddRunner, DelayRunner, EchoRunner, FnRunner, RunnerContext, RunnerRegistry, TaskRunner,
};
pub use worker::{Worker, WorkerState, WorkerStats};

/// Interval between checks of [`Node::wait_for_idle`].
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of workers a flat node gets when none is configured.
pub fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone)]
enum PoolLayout {
    Flat(usize),
    Grouped(Vec<WorkerGroupConfig>),
}

/// A pool of workers sharing a runner registry.
///
/// # Examples
///
/// ```rust
/// use relayq::prelude::*;
/// use serde_json::json;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> RelayResult<()> {
/// let queue: SharedQueue = Arc::new(LocalQueue::new());
/// let node = Arc::new(Node::new("local", 4, QueueFactory::shared(queue.clone()), Vec::new()));
/// node.add_runner(AddRunner).await;
///
/// let running = Arc::clone(&node);
/// let handle = tokio::spawn(async move { running.run().await });
///
/// let result = queue
///     .enqueue_and_wait(
///         TaskRequest::new("Add", json!({ "A": 1, "B": 2 })),
///         Duration::from_millis(100),
///         &CancellationToken::new(),
///     )
///     .await?;
/// assert_eq!(result.payload, json!(3));
///
/// node.stop_on_idle().await?;
/// handle.await.map_err(|e| RelayError::execution(e.to_string()))??;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    name: String,
    capabilities: Vec<Capability>,
    layout: PoolLayout,
    queue_factory: QueueFactory,
    queue: SharedQueue,
    registry: RunnerRegistry,
    tracer: Arc<dyn TraceCollector>,
    workers: Mutex<Option<Vec<Arc<Worker>>>>,
    cancel: CancellationToken,
}

impl Node {
    /// Create a node of `worker_count` identical workers.
    ///
    /// Every worker offers `capabilities` plus one tag per registered runner.
    pub fn new(
        name: impl Into<String>,
        worker_count: usize,
        queue_factory: QueueFactory,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self::with_layout(
            name.into(),
            capabilities,
            PoolLayout::Flat(worker_count),
            queue_factory,
        )
    }

    /// Create a node from a structured configuration.
    ///
    /// Without worker groups the node falls back to
    /// [`default_worker_count`] flat workers.
    pub fn from_config(config: NodeConfig, queue_factory: QueueFactory) -> Self {
        let layout = if config.workers.is_empty() {
            PoolLayout::Flat(default_worker_count())
        } else {
            PoolLayout::Grouped(config.workers)
        };
        Self::with_layout(config.name, config.capabilities, layout, queue_factory)
    }

    /// Create a node from a JSON configuration document.
    pub fn from_json(json: &str, queue_factory: QueueFactory) -> RelayResult<Self> {
        Ok(Self::from_config(NodeConfig::from_json(json)?, queue_factory))
    }

    /// Create a node from a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>, queue_factory: QueueFactory) -> RelayResult<Self> {
        Ok(Self::from_config(NodeConfig::from_file(path)?, queue_factory))
    }

    fn with_layout(
        name: String,
        capabilities: Vec<Capability>,
        layout: PoolLayout,
        queue_factory: QueueFactory,
    ) -> Self {
        let queue = queue_factory.create(None);
        Self {
            name,
            capabilities,
            layout,
            queue_factory,
            queue,
            registry: RunnerRegistry::new(),
            tracer: Arc::new(SpanCollector),
            workers: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Use a custom trace collector for every worker.
    ///
    /// Only affects workers built afterwards.
    pub fn with_tracer(mut self, tracer: Arc<dyn TraceCollector>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Share an existing runner registry.
    pub fn with_registry(mut self, registry: RunnerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry shared by every worker of the node
    pub fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    /// The node's own view of the queue
    pub fn queue(&self) -> SharedQueue {
        Arc::clone(&self.queue)
    }

    /// Token that hard-stops the whole pool
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a runner for every worker of the node.
    pub async fn add_runner<R: TaskRunner + 'static>(&self, runner: R) {
        self.registry.register(runner).await;
    }

    /// Register a closure as a runner called `name`.
    pub async fn add_runner_fn<F, Fut>(&self, name: impl Into<String>, run: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, crate::error::RunnerError>> + Send + 'static,
    {
        self.registry.register(FnRunner::new(name, run)).await;
    }

    /// Build the worker pool. Later calls return the same workers.
    pub async fn build(&self) -> Vec<Arc<Worker>> {
        let mut guard = self.workers.lock().await;
        if let Some(workers) = guard.as_ref() {
            return workers.clone();
        }

        let workers = match &self.layout {
            PoolLayout::Flat(count) => (0..*count)
                .map(|i| self.build_worker(format!("{}-{}", self.name, i), i, Vec::new()))
                .collect::<Vec<_>>(),
            PoolLayout::Grouped(groups) => {
                let mut workers = Vec::new();
                for group in groups {
                    for i in 0..group.replicas {
                        let index = workers.len();
                        workers.push(self.build_worker(
                            format!("{}-{}{}", self.name, group.name, i),
                            index,
                            group.capabilities.clone(),
                        ));
                    }
                }
                workers
            }
        };

        tracing::info!("Node {} built {} workers", self.name, workers.len());
        *guard = Some(workers.clone());
        workers
    }

    fn build_worker(
        &self,
        name: String,
        index: usize,
        mut capabilities: Vec<Capability>,
    ) -> Arc<Worker> {
        for capability in &self.capabilities {
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }

        tracing::debug!("Building worker {} with {:?}", name, capabilities);
        Arc::new(Worker::new(
            WorkerInfo::new(Uuid::new_v4(), name),
            capabilities,
            self.registry.clone(),
            self.queue_factory.create(Some(index)),
            Arc::clone(&self.tracer),
        ))
    }

    /// Snapshot of the built workers; empty until the pool is built.
    pub async fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.lock().await.clone().unwrap_or_default()
    }

    /// Build the pool if needed and run every worker until they all exit.
    ///
    /// A worker failing fatally hard-stops the rest of the pool; the first
    /// such error is returned once every worker has exited.
    pub async fn run(&self) -> RelayResult<()> {
        let workers = self.build().await;
        tracing::info!("Node {} running {} workers", self.name, workers.len());

        let handles = workers.iter().map(|worker| {
            let worker = Arc::clone(worker);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let outcome = worker.run(&cancel).await;
                if outcome.is_err() {
                    cancel.cancel();
                }
                outcome
            })
        });

        let mut first_error = None;
        for (worker, outcome) in workers.iter().zip(join_all(handles).await) {
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join_error) => RelayError::execution(format!(
                    "Worker {} panicked: {}",
                    worker.info().name,
                    join_error
                )),
            };
            tracing::error!("Node {}: worker {} failed: {}", self.name, worker.info().name, error);
            first_error.get_or_insert(error);
        }

        tracing::info!("Node {} stopped", self.name);
        first_error.map_or(Ok(()), Err)
    }

    /// Hard-stop the pool: parked workers exit, in-flight tasks finish.
    pub fn stop(&self) {
        tracing::info!("Stopping node {}", self.name);
        self.cancel.cancel();
    }

    /// Let every worker finish its current task, then stop.
    pub async fn graceful_stop(&self) {
        tracing::info!("Gracefully stopping node {}", self.name);
        for worker in self.workers().await {
            if !worker.is_stopping() {
                worker.graceful_stop();
            }
        }
    }

    /// Wait until the node's queue view is empty and every worker is idle.
    ///
    /// Stopped workers count as idle. Fails with
    /// [`RelayError::Cancelled`] if the node is hard-stopped while work is
    /// still outstanding.
    pub async fn wait_for_idle(&self) -> RelayResult<()> {
        let workers = self.build().await;
        loop {
            // Queue first: a worker leaves idle before it claims, so an empty
            // queue followed by idle workers means nothing is in flight.
            if self.queue.is_empty().await?
                && workers.iter().all(|w| w.is_idle() || w.is_stopped())
            {
                tracing::debug!("Node {} is idle", self.name);
                return Ok(());
            }
            cancellable_sleep(IDLE_POLL_INTERVAL, &self.cancel).await?;
        }
    }

    /// [`wait_for_idle`](Self::wait_for_idle), then [`stop`](Self::stop).
    pub async fn stop_on_idle(&self) -> RelayResult<()> {
        self.wait_for_idle().await?;
        self.stop();
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::queue::{LocalQueue, TaskQueue, TaskQueueExt};
    use crate::task::{TaskRequest, TaskResult};
    use crate::trace::{TraceMetadata, TraceSession};
    use serde_json::json;
    use tokio::task::JoinHandle;
    use tokio_test::{assert_err, assert_ok};

    fn local_queue() -> Arc<LocalQueue> {
        Arc::new(LocalQueue::with_config(
            QueueConfig::default().with_poll_interval(10),
        ))
    }

    fn spawn(node: &Arc<Node>) -> JoinHandle<RelayResult<()>> {
        let node = Arc::clone(node);
        tokio::spawn(async move { node.run().await })
    }

    async fn result_of(queue: &dyn TaskQueue, task_id: uuid::Uuid) -> TaskResult {
        tokio::time::timeout(
            Duration::from_secs(5),
            queue.get_result(task_id, &CancellationToken::new()),
        )
        .await
        .expect("result not produced in time")
        .unwrap()
    }

    #[tokio::test]
    async fn test_flat_pool() {
        let queue = local_queue();
        let node = Node::new(
            "flat",
            3,
            QueueFactory::shared(queue),
            vec![Capability::from("pool/default")],
        );
        node.add_runner(AddRunner).await;
        assert!(node.workers().await.is_empty());

        let workers = node.build().await;
        let names: Vec<_> = workers.iter().map(|w| w.info().name.clone()).collect();
        assert_eq!(names, vec!["flat-0", "flat-1", "flat-2"]);

        let caps = workers[0].capabilities().await;
        assert!(caps.offers(&Capability::from("pool/default")));
        assert!(caps.offers(&Capability::runner("Add")));

        // Idempotent
        let again = node.build().await;
        assert_eq!(again.len(), 3);
        assert!(Arc::ptr_eq(&workers[0], &again[0]));
        assert_eq!(node.workers().await.len(), 3);
    }

    #[tokio::test]
    async fn test_grouped_pool() {
        let indices = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&indices);
        let queue = local_queue();
        let factory = QueueFactory::from_fn(move |index| {
            seen.lock().unwrap().push(index);
            queue.clone()
        });

        let node = Node::from_json(
            r#"{
                "name": "grid",
                "capabilities": ["pool/shared"],
                "workers": [
                    { "name": "high", "replicas": 2, "capabilities": ["pool/high"] },
                    { "name": "low", "replicas": 1 }
                ]
            }"#,
            factory,
        )
        .unwrap();

        let workers = node.build().await;
        let names: Vec<_> = workers.iter().map(|w| w.info().name.clone()).collect();
        assert_eq!(names, vec!["grid-high0", "grid-high1", "grid-low0"]);

        let high = workers[1].capabilities().await;
        assert!(high.offers(&Capability::from("pool/high")));
        assert!(high.offers(&Capability::from("pool/shared")));

        let low = workers[2].capabilities().await;
        assert!(!low.offers(&Capability::from("pool/high")));
        assert!(low.offers(&Capability::from("pool/shared")));

        node.build().await;
        assert_eq!(
            *indices.lock().unwrap(),
            vec![None, Some(0), Some(1), Some(2)]
        );
    }

    #[tokio::test]
    async fn test_config_without_groups_is_flat() {
        let node = Node::from_config(NodeConfig::default(), QueueFactory::shared(local_queue()));
        let workers = node.build().await;
        assert_eq!(workers.len(), default_worker_count());
        assert_eq!(workers[0].info().name, "DefaultNode-0");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let factory = QueueFactory::shared(local_queue());
        let err = assert_err!(Node::from_json(r#"{ "name": "" }"#, factory));
        assert!(matches!(err, RelayError::Config { .. }));
    }

    #[tokio::test]
    async fn test_tasks_routed_by_capability() {
        let queue = local_queue();
        let config = NodeConfig {
            name: "node".to_string(),
            capabilities: Vec::new(),
            workers: vec![
                WorkerGroupConfig::new("a", 1).with_capability("pool/a"),
                WorkerGroupConfig::new("b", 1).with_capability("pool/b"),
            ],
        };
        let node = Arc::new(Node::from_config(config, QueueFactory::shared(queue.clone())));
        node.add_runner(AddRunner).await;
        let handle = spawn(&node);

        let mut for_b = Vec::new();
        let mut for_a = Vec::new();
        for i in 0..5 {
            for_b.push(
                queue
                    .enqueue(TaskRequest::new("Add", json!({"A": i, "B": 1})).require("pool/b"))
                    .await
                    .unwrap(),
            );
            for_a.push(
                queue
                    .enqueue(TaskRequest::new("Add", json!({"A": i, "B": 2})).require("pool/a"))
                    .await
                    .unwrap(),
            );
        }

        let workers = node.build().await;
        let b_id = workers[1].info().id.to_string();
        for task_id in for_b {
            let result = result_of(queue.as_ref(), task_id).await;
            assert_eq!(result.trace.entity("worker_id"), Some(b_id.as_str()));
            assert_eq!(result.trace.data["worker_name"], json!("node-b0"));
        }
        for task_id in for_a {
            let result = result_of(queue.as_ref(), task_id).await;
            assert_eq!(result.trace.data["worker_name"], json!("node-a0"));
        }

        node.stop();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_on_idle_drains_everything() {
        let queue = local_queue();
        let node = Arc::new(Node::new("drain", 4, QueueFactory::shared(queue.clone()), Vec::new()));
        node.add_runner(DelayRunner).await;
        let handle = spawn(&node);

        for i in 0..60u64 {
            queue
                .enqueue(TaskRequest::new("Delay", json!({"Delay": i % 5})).priority((i % 3) as i32))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(10), node.stop_on_idle())
            .await
            .unwrap()
            .unwrap();

        assert!(queue.is_empty().await.unwrap());
        assert_eq!(queue.completed_len().await, 60);
        assert_ok!(handle.await.unwrap());
        for worker in node.workers().await {
            assert_eq!(worker.state(), WorkerState::Stopped);
        }
    }

    #[tokio::test]
    async fn test_graceful_stop_ends_run() {
        let queue = local_queue();
        let node = Arc::new(Node::new("gentle", 2, QueueFactory::shared(queue.clone()), Vec::new()));
        node.add_runner(DelayRunner).await;
        let handle = spawn(&node);

        let task_id = queue
            .enqueue(TaskRequest::new("Delay", json!({"Delay": 50})))
            .await
            .unwrap();
        while !queue.is_empty().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        node.graceful_stop().await;
        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_ok!(outcome);
        assert!(queue.try_get_result(task_id).await.unwrap().is_some());
        assert!(!node.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_enqueue_and_wait_through_node_queue() {
        let queue = local_queue();
        let node = Arc::new(Node::new("prod", 2, QueueFactory::shared(queue), Vec::new()));
        node.add_runner_fn("Concat", |task: Task| async move {
            let parts: Vec<String> = serde_json::from_value(task.payload)?;
            Ok::<_, crate::error::RunnerError>(json!(parts.concat()))
        })
        .await;
        let handle = spawn(&node);

        let result = node
            .queue()
            .enqueue_and_wait(
                TaskRequest::new("Concat", json!(["relay", "q"])),
                Duration::from_millis(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.payload, json!("relayq"));

        node.stop_on_idle().await.unwrap();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_idle_cancelled_by_stop() {
        let queue = local_queue();
        // Nobody can run this task, so the node never gets idle
        queue
            .enqueue(TaskRequest::new("Nobody", json!(null)))
            .await
            .unwrap();
        let node = Arc::new(Node::new("stuck", 1, QueueFactory::shared(queue), Vec::new()));
        let handle = spawn(&node);

        let stopper = Arc::clone(&node);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            stopper.stop();
        });

        let err = assert_err!(node.wait_for_idle().await);
        assert!(err.is_cancelled());
        assert_ok!(handle.await.unwrap());
    }

    #[derive(Debug)]
    struct LossyCollector;

    struct LossySession;

    impl TraceSession for LossySession {
        fn associate(&mut self, _key: &str, _value: String) {}
        fn add_data(&mut self, _key: &str, _value: Value) {}
        fn event(&mut self, _message: String) {}
        fn finish(self: Box<Self>) -> Option<TraceMetadata> {
            None
        }
    }

    impl TraceCollector for LossyCollector {
        fn open(&self, _name: String) -> Box<dyn TraceSession> {
            Box::new(LossySession)
        }
    }

    #[tokio::test]
    async fn test_fatal_worker_error_stops_the_pool() {
        let queue = local_queue();
        let node = Arc::new(
            Node::new("lossy", 3, QueueFactory::shared(queue.clone()), Vec::new())
                .with_tracer(Arc::new(LossyCollector)),
        );
        node.add_runner(AddRunner).await;
        let handle = spawn(&node);

        queue
            .enqueue(TaskRequest::new("Add", json!({"A": 1, "B": 2})))
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        let err = assert_err!(outcome);
        assert!(matches!(err, RelayError::MissingTraceData { .. }));
        assert!(node.cancellation_token().is_cancelled());
    }
}
