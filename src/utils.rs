//! Clocks and polling helpers shared by the queues and the node.

use crate::error::{RelayError, RelayResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Monotonic time source injected into queues to stamp enqueue times.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Real clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the moment of construction
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute reading
    pub fn set(&self, at: Duration) {
        self.millis.store(at.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Sleep for `interval`, failing with [`RelayError::Cancelled`] if `cancel` fires first.
pub async fn cancellable_sleep(interval: Duration, cancel: &CancellationToken) -> RelayResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Run `attempt` until it yields a value, parking on `park` between misses.
///
/// Cancellation is checked before every attempt and while parked.
pub async fn poll_until<T, A, AF, P, PF>(
    cancel: &CancellationToken,
    mut attempt: A,
    mut park: P,
) -> RelayResult<T>
where
    A: FnMut() -> AF,
    AF: Future<Output = RelayResult<Option<T>>>,
    P: FnMut() -> PF,
    PF: Future<Output = ()>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        if let Some(value) = attempt().await? {
            return Ok(value);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            _ = park() => {}
        }
    }
}
