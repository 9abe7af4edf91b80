//! Value stores backing the cache and the call budget.
//!
//! Two interchangeable backends implement [`ValueStore`]:
//!
//! - [`MemoryStore`]: in-process, bounded, expiry enforced on read. Useful
//!   for local/offline runs and tests. Per-process only: two workers each
//!   see their own entries and their own budget counters.
//! - [`RedisStore`]: durable store shared by every worker process
//!   (`redis` feature). Counters use native atomic increments.
//!
//! Which backend is used is decided once at startup by [`connect()`];
//! callers only ever see `Arc<dyn ValueStore>`.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::StoreConfig;
use crate::{PropEdgeError, Result};

/// Keyed JSON store with per-entry TTL and atomic counters.
///
/// Implementations must be safe to share across tasks. Entries expire on
/// their own; there is no delete path.
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &str;

    /// Read a value. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write (or overwrite) a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    /// Atomically add `n` to the counter at `key`, creating it at zero if
    /// absent, and keep it for at least `retention`. Returns the new count.
    async fn increment(&self, key: &str, n: u64, retention: Duration) -> Result<u64>;

    /// Current counter value, or 0 if absent or expired.
    async fn counter(&self, key: &str) -> Result<u64>;
}

/// Build the store selected by configuration.
///
/// A `backend_url` selects the durable backend; without one, entries live
/// in an in-process [`MemoryStore`].
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn ValueStore>> {
    match config.backend_url.as_deref() {
        None | Some("") => {
            info!(
                max_entries = config.memory_max_entries,
                "using in-process store"
            );
            Ok(Arc::new(MemoryStore::with_max_entries(
                config.memory_max_entries,
            )))
        }
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            info!("using redis store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        Some(url) => Err(PropEdgeError::Configuration(format!(
            "store backend '{}' requires the `redis` feature",
            redact_url(url)
        ))),
    }
}

/// Strip credentials from a store URL before it reaches logs or errors.
pub(crate) fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Convert a TTL to whole seconds for backends with second granularity.
///
/// Sub-second TTLs round up so an entry is never written already expired.
pub(crate) fn ttl_secs(ttl: Duration) -> Result<u64> {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    if secs == 0 {
        return Err(PropEdgeError::InvalidPayload("TTL must be non-zero".into()));
    }
    Ok(secs)
}
