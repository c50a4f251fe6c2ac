//! Runner registry for relayq.
//!
//! A runner is the pluggable piece of business logic executed for every task
//! carrying its name. Runners implement [`TaskRunner`] and are registered by
//! name in a [`RunnerRegistry`]; every registered name turns into a synthetic
//! capability offered by the workers sharing the registry.
//!
//! # Examples
//!
//! ```rust
//! use relayq::prelude::*;
//! use serde_json::{Value, json};
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl TaskRunner for Shout {
//!     fn name(&self) -> &str {
//!         "Shout"
//!     }
//!
//!     async fn execute(&self, task: &Task, ctx: &mut RunnerContext<'_>) -> Result<Value, RunnerError> {
//!         let text: String = serde_json::from_value(task.payload.clone())?;
//!         ctx.event(format!("shouting {} chars", text.len()));
//!         Ok(json!(text.to_uppercase()))
//!     }
//! }
//!
//! # async fn example() {
//! let registry = RunnerRegistry::new();
//! registry.register(Shout).await;
//! assert!(registry.is_registered("Shout").await);
//! # }
//! ```

use crate::capability::{Capability, WorkerInfo};
use crate::error::RunnerError;
use crate::task::Task;
use crate::trace::TraceSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// What a runner sees while executing a task.
pub struct RunnerContext<'a> {
    worker: &'a WorkerInfo,
    session: &'a mut dyn TraceSession,
}

impl<'a> RunnerContext<'a> {
    /// Create a context for a worker and its open trace session
    pub fn new(worker: &'a WorkerInfo, session: &'a mut dyn TraceSession) -> Self {
        Self { worker, session }
    }

    /// The worker executing the task
    pub fn worker(&self) -> &WorkerInfo {
        self.worker
    }

    /// Record an event in the task's trace session
    pub fn event(&mut self, message: impl Into<String>) {
        self.session.event(message.into());
    }

    /// Attach data to the task's trace session
    pub fn add_data(&mut self, key: &str, value: Value) {
        self.session.add_data(key, value);
    }

    /// Direct access to the trace session
    pub fn session(&mut self) -> &mut dyn TraceSession {
        &mut *self.session
    }
}

/// Trait for executing tasks of one runner name.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Name matched against [`Task::runner`]
    fn name(&self) -> &str;

    /// Execute a task and return its output payload.
    async fn execute(&self, task: &Task, ctx: &mut RunnerContext<'_>)
    -> Result<Value, RunnerError>;
}

/// Boxed future returned by closure runners.
pub type RunnerFuture = Pin<Box<dyn Future<Output = Result<Value, RunnerError>> + Send>>;

/// Runner backed by a closure over the task.
///
/// The closure gets an owned copy of the task so it can move it into the
/// returned future.
pub struct FnRunner {
    name: String,
    run: Box<dyn Fn(Task) -> RunnerFuture + Send + Sync>,
}

impl FnRunner {
    /// Wrap `run` as a runner called `name`
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RunnerError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move |task| Box::pin(run(task))),
        }
    }
}

#[async_trait]
impl TaskRunner for FnRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        task: &Task,
        _ctx: &mut RunnerContext<'_>,
    ) -> Result<Value, RunnerError> {
        (self.run)(task.clone()).await
    }
}

/// Arguments of [`AddRunner`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AddArgs {
    /// Left operand
    #[serde(rename = "A")]
    pub a: i64,
    /// Right operand
    #[serde(rename = "B")]
    pub b: i64,
}

/// Adds two numbers: `{"A": 1, "B": 2}` → `3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddRunner;

impl AddRunner {
    /// Registered runner name
    pub const NAME: &'static str = "Add";
}

#[async_trait]
impl TaskRunner for AddRunner {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, task: &Task, ctx: &mut RunnerContext<'_>) -> Result<Value, RunnerError> {
        let args: AddArgs = serde_json::from_value(task.payload.clone())?;
        let sum = args
            .a
            .checked_add(args.b)
            .ok_or_else(|| RunnerError::new(format!("{} + {} overflows", args.a, args.b)))?;
        ctx.event(format!("{} + {} = {}", args.a, args.b, sum));
        Ok(json!(sum))
    }
}

/// Arguments of [`DelayRunner`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayArgs {
    /// Milliseconds to wait
    #[serde(rename = "Delay")]
    pub delay_ms: u64,
}

/// Waits `{"Delay": ms}` and returns `{"Id": task id, "Delay": ms}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayRunner;

impl DelayRunner {
    /// Registered runner name
    pub const NAME: &'static str = "Delay";
}

#[async_trait]
impl TaskRunner for DelayRunner {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, task: &Task, ctx: &mut RunnerContext<'_>) -> Result<Value, RunnerError> {
        let args: DelayArgs = serde_json::from_value(task.payload.clone())?;
        ctx.event(format!("Waiting for {}ms", args.delay_ms));
        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        Ok(json!({ "Id": task.id, "Delay": args.delay_ms }))
    }
}

/// Returns the payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoRunner;

impl EchoRunner {
    /// Registered runner name
    pub const NAME: &'static str = "Echo";
}

#[async_trait]
impl TaskRunner for EchoRunner {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(&self, task: &Task, _ctx: &mut RunnerContext<'_>) -> Result<Value, RunnerError> {
        Ok(task.payload.clone())
    }
}

/// Name-keyed, shareable set of runners.
///
/// Cloning is cheap and clones share the same registrations, so a runner added
/// through any clone is visible to every worker immediately.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: Arc<RwLock<HashMap<String, Arc<dyn TaskRunner>>>>,
}

impl RunnerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner under its own name, replacing any previous one.
    pub async fn register<R: TaskRunner + 'static>(&self, runner: R) {
        self.register_arc(Arc::new(runner)).await;
    }

    /// Register a runner built by `factory`.
    pub async fn register_with<F, R>(&self, factory: F)
    where
        F: FnOnce() -> R,
        R: TaskRunner + 'static,
    {
        self.register(factory()).await;
    }

    /// Register an already shared runner.
    pub async fn register_arc(&self, runner: Arc<dyn TaskRunner>) {
        let name = runner.name().to_string();
        let replaced = self
            .runners
            .write()
            .await
            .insert(name.clone(), runner)
            .is_some();

        if replaced {
            tracing::warn!(runner = %name, "Replaced task runner");
        } else {
            tracing::info!(runner = %name, "Registered task runner");
        }
    }

    /// Remove a runner; returns whether it was registered.
    pub async fn unregister(&self, name: &str) -> bool {
        self.runners.write().await.remove(name).is_some()
    }

    /// Look up a runner by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.read().await.get(name).cloned()
    }

    /// Check if a runner name is registered.
    pub async fn is_registered(&self, name: &str) -> bool {
        self.runners.read().await.contains_key(name)
    }

    /// All registered runner names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runners.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// One synthetic capability per registered runner.
    pub async fn capabilities(&self) -> Vec<Capability> {
        self.runners
            .read()
            .await
            .keys()
            .map(|name| Capability::runner(name))
            .collect()
    }

    /// Number of registered runners.
    pub async fn len(&self) -> usize {
        self.runners.read().await.len()
    }

    /// Whether no runner is registered.
    pub async fn is_empty(&self) -> bool {
        self.runners.read().await.is_empty()
    }
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerRegistry").finish_non_exhaustive()
    }
}
