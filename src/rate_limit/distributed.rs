use crate::config::RedisConfig;
use crate::rate_limit::store::{Counter, CounterStore, DistributedCounterStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// All distributed counter keys live under this namespace so the
/// administrative `clear` can match them without touching other data.
const KEY_NAMESPACE: &str = "rl:";

/// Increment-and-stamp-expiry as a single atomic script. Running both
/// commands server-side closes the gap where a crash between INCR and
/// EXPIRE would leave a counter without a TTL.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

const RESET_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('SET', KEYS[1], 0, 'KEEPTTL')
end
return 0
"#;

/// Lifecycle of the connection to the shared backend.
///
/// Only the connect task and `close` transition this state; a failed
/// command never does. The limiter treats anything other than `Connected`
/// as "route to the in-memory store".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

/// Counter store backed by a shared Redis instance.
///
/// Counts are shared across all service instances; cross-process ordering
/// comes solely from Redis serializing the increment script. Constructed
/// only when Redis is configured, and connected asynchronously: traffic is
/// routed here only after connection confirmation.
pub struct RedisCounterStore {
    connection: Mutex<Option<ConnectionManager>>,
    state: Mutex<ConnectionState>,
    command_timeout: Duration,
}

impl RedisCounterStore {
    /// Build the store in `Connecting` state and establish the connection
    /// in the background. Never blocks startup and never fails it: a bad
    /// address leaves the store in `Errored` state and the service running
    /// on the in-memory store alone.
    pub fn connect(config: &RedisConfig) -> Arc<Self> {
        let store = Arc::new(Self {
            connection: Mutex::new(None),
            state: Mutex::new(ConnectionState::Connecting),
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
        });

        let url = config.url.clone();
        let connect_timeout = Duration::from_secs(config.connect_timeout_seconds);
        let task_store = store.clone();
        tokio::spawn(async move {
            match Self::open(&url, connect_timeout).await {
                Ok(manager) => {
                    *task_store.connection.lock().unwrap() = Some(manager);
                    task_store.set_state(ConnectionState::Connected);
                    tracing::info!("Distributed counter store connected");
                }
                Err(e) => {
                    task_store.set_state(ConnectionState::Errored);
                    tracing::warn!(
                        error = %e,
                        "Distributed counter store connection failed, continuing in-memory"
                    );
                }
            }
        });

        store
    }

    async fn open(url: &str, timeout: Duration) -> Result<ConnectionManager, StoreError> {
        let client = Client::open(url)?;
        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(manager)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Drop the connection during process shutdown.
    pub fn close(&self) {
        self.connection.lock().unwrap().take();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Distributed counter store closed");
    }

    fn manager(&self) -> Result<ConnectionManager, StoreError> {
        self.connection
            .lock()
            .unwrap()
            .clone()
            .ok_or(StoreError::Unavailable)
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", KEY_NAMESPACE, key)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError> {
        let mut manager = self.manager()?;
        let redis_key = Self::namespaced(key);
        let window_ms = window.as_millis() as u64;

        let script = Script::new(INCREMENT_SCRIPT);
        let (count, ttl_ms): (u64, i64) = self
            .with_timeout(
                script
                    .key(&redis_key)
                    .arg(window_ms)
                    .invoke_async(&mut manager),
            )
            .await?;

        Ok(Counter {
            count,
            reset_at: Utc::now() + chrono::Duration::milliseconds(ttl_ms),
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut manager = self.manager()?;
        let redis_key = Self::namespaced(key);

        let script = Script::new(RESET_SCRIPT);
        let _: i64 = self
            .with_timeout(script.key(&redis_key).invoke_async(&mut manager))
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut manager = self.manager()?;

        let pattern = format!("{}*", KEY_NAMESPACE);
        let keys: Vec<String> = {
            let mut iter = manager.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if !keys.is_empty() {
            let _: () = manager.del(keys).await?;
        }
        Ok(())
    }
}

impl DistributedCounterStore for RedisCounterStore {
    fn is_available(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RedisConfig {
        RedisConfig {
            // Nothing listens on port 1; the connect attempt fails fast.
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout_seconds: 2,
            command_timeout_seconds: 1,
        }
    }

    async fn wait_for_terminal_state(store: &RedisCounterStore) -> ConnectionState {
        for _ in 0..100 {
            let state = store.state();
            if state != ConnectionState::Connecting {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        store.state()
    }

    #[tokio::test]
    async fn test_unreachable_backend_ends_in_errored_state() {
        let store = RedisCounterStore::connect(&unreachable_config());

        let state = wait_for_terminal_state(&store).await;
        assert_eq!(state, ConnectionState::Errored);
        assert!(!store.is_available());
    }

    #[tokio::test]
    async fn test_increment_without_connection_is_unavailable() {
        let store = RedisCounterStore::connect(&unreachable_config());
        wait_for_terminal_state(&store).await;

        let result = store.increment("login:1.2.3.4", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(StoreError::Unavailable)));
    }

    #[tokio::test]
    async fn test_close_transitions_to_disconnected() {
        let store = RedisCounterStore::connect(&unreachable_config());
        wait_for_terminal_state(&store).await;

        store.close();
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert!(!store.is_available());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_increment_and_reset_roundtrip() {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_seconds: 5,
            command_timeout_seconds: 2,
        };
        let store = RedisCounterStore::connect(&config);
        for _ in 0..100 {
            if store.is_available() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(store.is_available());

        let test_key = "test:distributed:roundtrip";
        store.clear().await.unwrap();

        let first = store.increment(test_key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.count, 1);

        let second = store.increment(test_key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(second.count, 2);

        store.reset(test_key).await.unwrap();
        let after_reset = store.increment(test_key, Duration::from_secs(60)).await.unwrap();
        assert_eq!(after_reset.count, 1);

        store.clear().await.unwrap();
    }
}
