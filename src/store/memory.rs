//! In-process [`ValueStore`] backed by moka.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;

use super::ValueStore;
use crate::{PropEdgeError, Result};

/// Default maximum number of entries held in memory.
pub const DEFAULT_MEMORY_MAX_ENTRIES: u64 = 100_000;

#[derive(Clone)]
enum Slot {
    Json(Arc<Value>),
    Counter(Arc<AtomicU64>),
}

#[derive(Clone)]
struct Entry {
    slot: Slot,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-memory store with per-entry TTL.
///
/// Expired entries are never returned; moka evicts them lazily and under
/// capacity pressure. Counters are atomic cells, so concurrent increments
/// inside one process never lose updates. Nothing is shared across
/// processes.
pub struct MemoryStore {
    entries: Cache<String, Entry>,
}

impl MemoryStore {
    /// Create a store with the default capacity.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MEMORY_MAX_ENTRIES)
    }

    /// Create a store holding at most `max` entries.
    pub fn with_max_entries(max: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.entries.get(key).await {
            Some(Entry {
                slot: Slot::Json(value),
                ..
            }) => Ok(Some(Value::clone(&value))),
            Some(Entry {
                slot: Slot::Counter(count),
                ..
            }) => Ok(Some(Value::from(count.load(Ordering::Acquire)))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(PropEdgeError::InvalidPayload("TTL must be non-zero".into()));
        }
        let entry = Entry {
            slot: Slot::Json(Arc::new(value.clone())),
            ttl,
        };
        self.entries.insert(key.to_owned(), entry).await;
        Ok(())
    }

    async fn increment(&self, key: &str, n: u64, retention: Duration) -> Result<u64> {
        if retention.is_zero() {
            return Err(PropEdgeError::InvalidPayload("counter retention must be non-zero".into()));
        }
        // or_insert_with is atomic per key: racing first increments share one cell.
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(async move {
                Entry {
                    slot: Slot::Counter(Arc::new(AtomicU64::new(0))),
                    ttl: retention,
                }
            })
            .await
            .into_value();

        match entry.slot {
            Slot::Counter(count) => Ok(count.fetch_add(n, Ordering::AcqRel) + n),
            Slot::Json(_) => Err(PropEdgeError::Store(format!(
                "key '{key}' holds a value, not a counter"
            ))),
        }
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        match self.entries.get(key).await {
            Some(Entry {
                slot: Slot::Counter(count),
                ..
            }) => Ok(count.load(Ordering::Acquire)),
            Some(_) => Err(PropEdgeError::Store(format!(
                "key '{key}' holds a value, not a counter"
            ))),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryStore::new();
        store
            .set("k", &json!({"response": [1, 2]}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"response": [1, 2]})));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = MemoryStore::new();
        store.set("k", &json!(1), Duration::from_secs(60)).await.unwrap();
        store.set("k", &json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn entries_expire_after_their_own_ttl() {
        let store = MemoryStore::new();
        store.set("short", &json!("a"), Duration::from_millis(50)).await.unwrap();
        store.set("long", &json!("b"), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get("short").await.unwrap().is_none());
        assert_eq!(store.get("long").await.unwrap(), Some(json!("b")));
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let store = MemoryStore::new();
        assert!(store.set("k", &json!(1), Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn counter_starts_at_zero_and_accumulates() {
        let store = MemoryStore::new();
        let day = Duration::from_secs(26 * 3600);
        assert_eq!(store.counter("c").await.unwrap(), 0);
        assert_eq!(store.increment("c", 1, day).await.unwrap(), 1);
        assert_eq!(store.increment("c", 4, day).await.unwrap(), 5);
        assert_eq!(store.counter("c").await.unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let retention = Duration::from_secs(60);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.increment("c", 1, retention).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.counter("c").await.unwrap(), 64);
    }

    #[tokio::test]
    async fn zero_retention_is_rejected() {
        let store = MemoryStore::new();
        assert!(store.increment("c", 1, Duration::ZERO).await.is_err());
        assert_eq!(store.counter("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counter_on_value_key_is_an_error() {
        let store = MemoryStore::new();
        store.set("k", &json!(1), Duration::from_secs(60)).await.unwrap();
        assert!(store.increment("k", 1, Duration::from_secs(60)).await.is_err());
    }
}
