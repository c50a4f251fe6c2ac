//! Configuration types for relayq.
//!
//! This module contains the structured node configuration (worker groups with
//! their own replica counts and capabilities) along with queue, server and
//! logging settings.

use crate::capability::Capability;
use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default interval between claim or result polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Structured node configuration.
///
/// # Examples
///
/// ```rust
/// use relayq::config::NodeConfig;
///
/// let config = NodeConfig::from_json(r#"{
///     "name": "render-node",
///     "capabilities": ["relayq/pool/default"],
///     "workers": [
///         { "name": "gpu", "replicas": 2, "capabilities": ["relayq/pool/gpu"] },
///         { "name": "cpu", "replicas": 4 }
///     ]
/// }"#).unwrap();
///
/// assert_eq!(config.total_replicas(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name, used as the prefix of every worker name
    pub name: String,

    /// Capabilities offered by every worker on the node
    pub capabilities: Vec<Capability>,

    /// Worker groups
    pub workers: Vec<WorkerGroupConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "DefaultNode".to_string(),
            capabilities: Vec::new(),
            workers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Parse a node configuration from JSON.
    pub fn from_json(json: &str) -> RelayResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Load a node configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded node configuration");
        Self::from_json(&json)
    }

    /// Total number of workers across all groups.
    pub fn total_replicas(&self) -> usize {
        self.workers.iter().map(|w| w.replicas).sum()
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Node name must not be empty".to_string());
        }

        for (index, group) in self.workers.iter().enumerate() {
            if group.name.trim().is_empty() {
                errors.push(format!("Worker group #{} has an empty name", index));
            }

            if self
                .workers
                .iter()
                .take(index)
                .any(|other| other.name == group.name)
            {
                errors.push(format!("Worker group '{}' is declared twice", group.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn ensure_valid(&self) -> RelayResult<()> {
        self.validate()
            .map_err(|errors| RelayError::config(errors.join("; ")))
    }
}

/// One named group of identical workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerGroupConfig {
    /// Group name, part of every worker name in the group
    pub name: String,

    /// Number of workers in the group
    pub replicas: usize,

    /// Capabilities offered by workers of this group, on top of the node's
    pub capabilities: Vec<Capability>,
}

impl Default for WorkerGroupConfig {
    fn default() -> Self {
        Self {
            name: "DefaultWorker".to_string(),
            replicas: 0,
            capabilities: Vec::new(),
        }
    }
}

impl WorkerGroupConfig {
    /// Create a group with no extra capabilities.
    pub fn new(name: impl Into<String>, replicas: usize) -> Self {
        Self {
            name: name.into(),
            replicas,
            capabilities: Vec::new(),
        }
    }

    /// Add a capability to the group.
    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

/// Queue polling configuration, shared by local and remote queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Interval between claim/result polls (in milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl QueueConfig {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms.millis()
    }
}

/// Queue server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4578".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Include target module in logs
    pub include_targets: bool,

    /// Enable colored output
    pub colored: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_targets: false,
            colored: true,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Install a global `tracing` subscriber for `config`.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> RelayResult<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .with_target(config.include_targets)
        .with_ansi(config.colored)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| RelayError::config(format!("Failed to install logger: {}", e)))
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}
