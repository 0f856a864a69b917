use crate::rate_limit::store::{Counter, CounterStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory counter store with bounded capacity.
///
/// Counters live in a least-recently-used map: when the capacity bound is
/// reached the coldest key is evicted. Every entry additionally carries a
/// maximum time-to-live independent of any policy window, so abandoned keys
/// cannot hold memory for longer than that bound even below capacity.
///
/// This store is always constructed at process start and serves as the
/// fallback whenever the distributed store is unavailable. Counts are local
/// to the process and lost on restart.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, MemoryEntry>,
    /// Touch tick -> key, ordered coldest first.
    recency: BTreeMap<u64, String>,
    tick: u64,
    capacity: usize,
    max_entry_ttl: Duration,
}

struct MemoryEntry {
    count: u64,
    reset_at: chrono::DateTime<Utc>,
    inserted: Instant,
    tick: u64,
}

impl InMemoryStore {
    pub fn new(capacity: usize, max_entry_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
                capacity,
                max_entry_ttl,
            }),
        }
    }

    /// Number of live entries, for diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<Counter, StoreError> {
        let mut guard = self.inner.lock().unwrap();
        let Inner {
            entries,
            recency,
            tick,
            capacity,
            max_entry_ttl,
        } = &mut *guard;

        // The whole read-modify-write happens under the lock with no await
        // point, so concurrent increments for the same key serialize here.
        let now = Utc::now();
        *tick += 1;
        let touch = *tick;

        if let Some(entry) = entries.get_mut(key) {
            let window_live = now < entry.reset_at;
            let within_ttl = entry.inserted.elapsed() < *max_entry_ttl;
            if window_live && within_ttl {
                entry.count += 1;
                recency.remove(&entry.tick);
                entry.tick = touch;
                recency.insert(touch, key.to_string());
                return Ok(Counter {
                    count: entry.count,
                    reset_at: entry.reset_at,
                });
            }
        }

        // No live entry: start a fresh window.
        let reset_at = now + chrono::Duration::milliseconds(window.as_millis() as i64);
        if let Some(old) = entries.insert(
            key.to_string(),
            MemoryEntry {
                count: 1,
                reset_at,
                inserted: Instant::now(),
                tick: touch,
            },
        ) {
            recency.remove(&old.tick);
        }
        recency.insert(touch, key.to_string());

        while entries.len() > *capacity {
            match recency.pop_first() {
                Some((_, coldest)) => {
                    entries.remove(&coldest);
                }
                None => break,
            }
        }

        Ok(Counter { count: 1, reset_at })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(entry) = guard.entries.get_mut(key) {
            entry.count = 0;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap();
        guard.entries.clear();
        guard.recency.clear();
        Ok(())
    }
}
