//! Capability tags and worker identity.
//!
//! A capability is an opaque tag naming something a worker can do or a
//! resource it has access to. Tasks declare the tags they require, workers
//! declare the tags they offer, and a task is only ever handed to a worker
//! offering every tag it requires.
//!
//! Tags follow the `<domain>/<kind>/<name>` convention. Each registered runner
//! contributes a synthetic `relayq/runner/<name>` tag, built by
//! [`Capability::runner`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Namespace prefix of the synthetic per-runner tag.
pub const RUNNER_CAPABILITY_PREFIX: &str = "relayq/runner/";

/// A single capability tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Wrap an arbitrary tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The synthetic tag offered by a worker that has `runner` registered
    pub fn runner(runner: &str) -> Self {
        Self(format!("{}{}", RUNNER_CAPABILITY_PREFIX, runner))
    }

    /// The tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The runner name if this is a synthetic runner tag
    pub fn runner_name(&self) -> Option<&str> {
        self.0.strip_prefix(RUNNER_CAPABILITY_PREFIX)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Capability {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl AsRef<str> for Capability {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker id
    pub id: Uuid,
    /// Human-readable worker name
    pub name: String,
}

impl WorkerInfo {
    /// Create worker info with an explicit name
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Create worker info with a name derived from the id
    pub fn anonymous(id: Uuid) -> Self {
        let simple = id.simple().to_string();
        Self {
            id,
            name: format!("worker-{}", &simple[..8]),
        }
    }
}

/// A worker's identity plus the tags it currently offers.
///
/// This is what a worker presents when claiming work, locally or over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    /// The worker presenting these capabilities
    pub worker: WorkerInfo,
    /// Offered tags
    pub capabilities: BTreeSet<Capability>,
}

impl WorkerCapabilities {
    /// Bundle a worker identity with its offered tags
    pub fn new(worker: WorkerInfo, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            worker,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Whether a single tag is offered
    pub fn offers(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether every tag in `required` is offered
    pub fn satisfies<'a>(&self, required: impl IntoIterator<Item = &'a Capability>) -> bool {
        required.into_iter().all(|c| self.offers(c))
    }
}
