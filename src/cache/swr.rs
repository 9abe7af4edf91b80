//! Stale-while-revalidate access pattern.
//!
//! Values are JSON objects stamped with `meta.cached_at` (unix seconds)
//! when stored. Given `age = now - cached_at`:
//!
//! | age                      | result                                         |
//! |--------------------------|------------------------------------------------|
//! | `< soft_ttl`             | return cached value                            |
//! | `soft_ttl ..= hard_ttl`  | return cached value, refresh in the background |
//! | `> hard_ttl` or missing  | fetch synchronously, store, return             |
//!
//! Background refresh failures are logged and dropped; the caller already
//! has its answer. Synchronous fetch failures are returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::CoalescingCache;
use crate::telemetry;
use crate::{PropEdgeError, Result};

/// How a cached value relates to its soft and hard windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Age {
    Fresh,
    SoftStale,
    Expired,
}

impl Age {
    fn of(value: &Value, now: i64, soft_ttl: Duration, hard_ttl: Duration) -> Self {
        let Some(cached_at) = cached_at(value) else {
            return Age::Expired;
        };
        let age = now.saturating_sub(cached_at);
        if age > secs(hard_ttl) {
            Age::Expired
        } else if age >= secs(soft_ttl) {
            Age::SoftStale
        } else {
            Age::Fresh
        }
    }
}

impl CoalescingCache {
    /// Serve from cache immediately, refreshing soft-stale values in the
    /// background.
    ///
    /// `fetch_fn` must produce a JSON object; the cache sets its
    /// `meta.cached_at` before storing. Entries are stored for `hard_ttl`,
    /// which must be non-zero.
    /// The synchronous path holds the key's lock, so concurrent callers on
    /// an expired key share one fetch, and at most one background refresh
    /// per key is in flight.
    pub async fn fetch_swr<F, Fut>(
        &self,
        key: &str,
        soft_ttl: Duration,
        hard_ttl: Duration,
        fetch_fn: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if hard_ttl.is_zero() {
            return Err(PropEdgeError::Configuration(
                "stale-while-revalidate hard TTL must be non-zero".into(),
            ));
        }

        if let Some(current) = self.store.get(key).await? {
            match Age::of(&current, unix_now(), soft_ttl, hard_ttl) {
                Age::Fresh => {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "swr").increment(1);
                    return Ok(current);
                }
                Age::SoftStale => {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "swr").increment(1);
                    self.spawn_revalidation(key, hard_ttl, fetch_fn);
                    return Ok(current);
                }
                Age::Expired => {}
            }
        }

        let _guard = self.locks.lock(key).await;

        // Someone may have refreshed the key while we waited.
        if let Some(current) = self.store.get(key).await? {
            if Age::of(&current, unix_now(), soft_ttl, hard_ttl) != Age::Expired {
                debug!(key, "refreshed by a concurrent caller");
                return Ok(current);
            }
        }

        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "mode" => "swr").increment(1);
        debug!(key, "no usable cached value, fetching");
        let value = stamp(fetch_fn().await?, unix_now())?;
        self.write_best_effort(key, &value, hard_ttl).await;
        Ok(value)
    }

    fn spawn_revalidation<F, Fut>(&self, key: &str, hard_ttl: Duration, fetch_fn: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let Some(guard) = self.locks.try_lock(key) else {
            debug!(key, "revalidation already in flight");
            metrics::counter!(telemetry::REVALIDATIONS_TOTAL, "status" => "skipped").increment(1);
            return;
        };

        let store = Arc::clone(&self.store);
        let key = key.to_owned();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome: Result<()> = async {
                let value = stamp(fetch_fn().await?, unix_now())?;
                store.set(&key, &value, hard_ttl).await
            }
            .await;

            match outcome {
                Ok(()) => {
                    debug!(key, "background revalidation stored fresh value");
                    metrics::counter!(telemetry::REVALIDATIONS_TOTAL, "status" => "ok")
                        .increment(1);
                }
                Err(e) => {
                    warn!(key, error = %e, "background revalidation failed, keeping cached value");
                    metrics::counter!(telemetry::REVALIDATIONS_TOTAL, "status" => "error")
                        .increment(1);
                }
            }
        });
    }
}

/// Read `meta.cached_at` as unix seconds.
pub fn cached_at(value: &Value) -> Option<i64> {
    let raw = value.pointer("/meta/cached_at")?;
    raw.as_i64().or_else(|| raw.as_f64().map(|f| f as i64))
}

/// Set `meta.cached_at = now`, creating `meta` if needed.
fn stamp(mut value: Value, now: i64) -> Result<Value> {
    let Value::Object(map) = &mut value else {
        return Err(PropEdgeError::InvalidPayload(
            "stale-while-revalidate values must be JSON objects".into(),
        ));
    };
    match map
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(meta) => {
            meta.insert("cached_at".into(), Value::from(now));
        }
        _ => {
            return Err(PropEdgeError::InvalidPayload(
                "`meta` must be a JSON object".into(),
            ));
        }
    }
    Ok(value)
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}
