use crate::errors::Result;
use crate::observability::MetricsRecorder;
use crate::rate_limit::memory::InMemoryStore;
use crate::rate_limit::policy::RateLimitPolicy;
use crate::rate_limit::store::{Counter, CounterStore, DistributedCounterStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a rate limit check, with the counters behind it.
#[derive(Debug, Clone)]
pub enum RateLimitDecision {
    Allowed(RateLimitStatus),
    Rejected(RateLimitStatus),
}

#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitStatus {
    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let remaining_ms = (self.reset_at - Utc::now()).num_milliseconds();
        if remaining_ms <= 0 {
            0
        } else {
            ((remaining_ms + 999) / 1000) as u64
        }
    }
}

/// Rate limiter service owned by the composition root and injected into
/// route registration.
///
/// Routes every increment to the distributed store while it reports
/// available, and to the always-present in-memory store otherwise. A
/// distributed error on a single call falls back for that call only;
/// availability is tracked at the connection level by the store itself.
pub struct RateLimiter {
    memory: InMemoryStore,
    distributed: Option<Arc<dyn DistributedCounterStore>>,
}

impl RateLimiter {
    pub fn new(
        memory: InMemoryStore,
        distributed: Option<Arc<dyn DistributedCounterStore>>,
    ) -> Self {
        Self {
            memory,
            distributed,
        }
    }

    /// Count one request for `subject` against `policy` and decide.
    ///
    /// The decision is returned as data; mapping it (or an error) onto an
    /// HTTP response is the middleware's concern.
    pub async fn check(
        &self,
        policy: &RateLimitPolicy,
        subject: &str,
    ) -> Result<RateLimitDecision> {
        let key = format!("{}:{}", policy.key_prefix, subject);
        let counter = self.increment(&key, policy.window).await?;

        let status = RateLimitStatus {
            limit: policy.max_requests,
            current: counter.count,
            remaining: policy.max_requests.saturating_sub(counter.count),
            reset_at: counter.reset_at,
        };

        if counter.count > policy.max_requests {
            MetricsRecorder::record_rate_limit_exceeded(policy.name, policy.scope.label());
            Ok(RateLimitDecision::Rejected(status))
        } else {
            Ok(RateLimitDecision::Allowed(status))
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> std::result::Result<Counter, StoreError> {
        if let Some(store) = &self.distributed {
            if store.is_available() {
                match store.increment(key, window).await {
                    Ok(counter) => return Ok(counter),
                    Err(e) => {
                        tracing::warn!(
                            key = %key,
                            error = %e,
                            "Distributed counter store failed, falling back to in-memory"
                        );
                        MetricsRecorder::record_store_fallback();
                    }
                }
            }
        }
        self.memory.increment(key, window).await
    }

    /// Administrative reset of one scoping key on both stores.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.memory.reset(key).await?;
        if let Some(store) = &self.distributed {
            if store.is_available() {
                if let Err(e) = store.reset(key).await {
                    tracing::warn!(key = %key, error = %e, "Distributed counter reset failed");
                }
            }
        }
        Ok(())
    }

    /// Administrative clear of all counters on both stores.
    pub async fn clear(&self) -> Result<()> {
        self.memory.clear().await?;
        if let Some(store) = &self.distributed {
            if store.is_available() {
                if let Err(e) = store.clear().await {
                    tracing::warn!(error = %e, "Distributed counter clear failed");
                }
            }
        }
        Ok(())
    }
}
