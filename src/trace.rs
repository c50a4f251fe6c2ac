//! Per-task observability sessions.
//!
//! The worker opens one [`TraceSession`] for every task it executes and
//! closes it once the runner returns. Closing the session yields the
//! [`TraceMetadata`] that travels with the [`TaskResult`](crate::task::TaskResult).
//!
//! [`SpanCollector`] is the built-in collector: it wraps each session in a
//! `tracing` span and measures wall time. Plug in another
//! [`TraceCollector`] to ship sessions somewhere else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Metadata captured by a finished trace session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceMetadata {
    /// Session name
    pub name: String,
    /// Associated entity ids (task id, worker id, ...)
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
    /// Free-form data attached to the session
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Events recorded while the session was open
    #[serde(default)]
    pub events: Vec<TraceEvent>,
    /// Wall time between open and finish
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl TraceMetadata {
    /// Look up an associated entity
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }
}

/// A message recorded inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// Milliseconds since the session was opened
    pub offset_ms: u64,
    /// Event text
    pub message: String,
}

/// An open observability scope for one unit of work.
pub trait TraceSession: Send {
    /// Associate an entity id (e.g. `task_id`) with the session
    fn associate(&mut self, key: &str, value: String);

    /// Attach a data value to the session
    fn add_data(&mut self, key: &str, value: serde_json::Value);

    /// Record an event
    fn event(&mut self, message: String);

    /// Close the session.
    ///
    /// `None` means the collector lost the session; the worker treats this as fatal.
    fn finish(self: Box<Self>) -> Option<TraceMetadata>;
}

/// Factory for trace sessions.
pub trait TraceCollector: Send + Sync + fmt::Debug {
    /// Open a named session
    fn open(&self, name: String) -> Box<dyn TraceSession>;
}

/// Collector backed by `tracing` spans.
#[derive(Debug, Clone, Default)]
pub struct SpanCollector;

impl TraceCollector for SpanCollector {
    fn open(&self, name: String) -> Box<dyn TraceSession> {
        let span = tracing::info_span!("task", session = %name);
        tracing::debug!(parent: &span, "Trace session opened");

        Box::new(SpanSession {
            span,
            started: Instant::now(),
            metadata: TraceMetadata {
                name,
                ..Default::default()
            },
        })
    }
}

/// Session produced by [`SpanCollector`].
pub struct SpanSession {
    span: tracing::Span,
    started: Instant,
    metadata: TraceMetadata,
}

impl TraceSession for SpanSession {
    fn associate(&mut self, key: &str, value: String) {
        self.metadata.entities.insert(key.to_string(), value);
    }

    fn add_data(&mut self, key: &str, value: serde_json::Value) {
        self.metadata.data.insert(key.to_string(), value);
    }

    fn event(&mut self, message: String) {
        tracing::info!(parent: &self.span, "{}", message);
        self.metadata.events.push(TraceEvent {
            offset_ms: self.started.elapsed().as_millis() as u64,
            message,
        });
    }

    fn finish(self: Box<Self>) -> Option<TraceMetadata> {
        let SpanSession {
            span,
            started,
            mut metadata,
        } = *self;
        metadata.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            parent: &span,
            elapsed_ms = metadata.elapsed_ms,
            events = metadata.events.len(),
            "Trace session finished"
        );
        Some(metadata)
    }
}
