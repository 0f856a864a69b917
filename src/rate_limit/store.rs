use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Number of requests observed for one scoping key within the current
/// fixed window, together with the instant the window ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Errors surfaced by counter store backends.
///
/// The in-memory store never produces these; the distributed store maps
/// connection and command failures here so the limiter can fall back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store is not available")]
    Unavailable,

    #[error("backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Increment/reset contract shared by all rate limit counter stores.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically create-or-increment the counter for `key`.
    ///
    /// If no live entry exists (none, or the previous window has passed),
    /// a new window starts with `count = 1` and `reset_at = now + window`.
    /// Otherwise the count is incremented in place and the existing
    /// `reset_at` is returned unchanged. Increments for the same key must
    /// never be lost under concurrent calls.
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError>;

    /// Set the count for `key` to 0 if present, preserving `reset_at`.
    /// Unknown keys are not an error.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Drop all entries. Testing and administrative use only.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// A counter store backed by a shared external service.
///
/// The limiter queries `is_available` before routing an increment here;
/// a store reports available only once its connection is confirmed.
pub trait DistributedCounterStore: CounterStore {
    fn is_available(&self) -> bool;
}
