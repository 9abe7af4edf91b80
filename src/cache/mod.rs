//! Budget-aware coalescing cache.
//!
//! Every upstream fetch goes through [`CoalescingCache`], which offers two
//! access patterns:
//!
//! - [`fetch_with_cache()`](CoalescingCache::fetch_with_cache): hard TTL
//!   with a daily call budget. Each logical request keeps a short-lived
//!   *fresh* copy and a long-lived *stale* copy. Once a provider's budget
//!   is spent, the stale copy is served instead of calling upstream; with
//!   no stale copy the call fails with
//!   [`UpstreamExhausted`](crate::PropEdgeError::UpstreamExhausted). Data
//!   is never fabricated.
//!
//! - [`fetch_swr()`](CoalescingCache::fetch_swr): stale-while-revalidate.
//!   Values carry `meta.cached_at`; soft-stale values are returned at once
//!   while a background task refreshes them.
//!
//! Both patterns use [`KeyedLocks`] so that concurrent callers for one key
//! within a process share a single upstream call.
//!
//! # Example
//!
//! ```rust,no_run
//! use propedge::{CacheTtl, CoalescingCache, Params};
//! use serde_json::json;
//!
//! # async fn run() -> propedge::Result<()> {
//! let cache = CoalescingCache::builder().soft_cap("apisports", 90).build()?;
//!
//! let mut params = Params::new();
//! params.insert("search".into(), json!("kelce"));
//!
//! let players = cache
//!     .fetch_with_cache("apisports", "/players", &params, CacheTtl::default(), || async {
//!         Ok(json!({"response": []}))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod key;
pub mod singleflight;
mod swr;

pub use key::{Params, derive_key, fresh_prefix, stale_prefix};
pub use singleflight::{KeyGuard, KeyedLocks};
pub use swr::cached_at;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::budget::{CallBudget, DEFAULT_RETENTION};
use crate::config::Config;
use crate::store::{self, MemoryStore, ValueStore};
use crate::telemetry;
use crate::{PropEdgeError, Result};

/// Default soft cap on upstream calls per provider per day.
pub const DEFAULT_SOFT_CAP: u64 = 90;

/// Freshness and resilience windows for one call site.
///
/// ```rust
/// # use propedge::CacheTtl;
/// # use std::time::Duration;
/// let ttl = CacheTtl::default().fresh(Duration::from_secs(12 * 3600));
/// assert_eq!(ttl.stale, Duration::from_secs(3 * 86_400));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtl {
    /// How long the fresh copy is served without going upstream. Default: 1 hour.
    pub fresh: Duration,
    /// How long the fallback copy survives. Default: 3 days.
    pub stale: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            fresh: Duration::from_secs(3600),
            stale: Duration::from_secs(3 * 86_400),
        }
    }
}

impl CacheTtl {
    pub fn new(fresh: Duration, stale: Duration) -> Self {
        Self { fresh, stale }
    }

    /// Set the fresh window.
    pub fn fresh(mut self, ttl: Duration) -> Self {
        self.fresh = ttl;
        self
    }

    /// Set the stale window.
    pub fn stale(mut self, ttl: Duration) -> Self {
        self.stale = ttl;
        self
    }

    /// Both windows must be non-zero; a zero TTL would store nothing.
    pub fn validate(&self) -> Result<()> {
        if self.fresh.is_zero() || self.stale.is_zero() {
            return Err(PropEdgeError::Configuration(format!(
                "cache TTLs must be non-zero (fresh {:?}, stale {:?})",
                self.fresh, self.stale
            )));
        }
        Ok(())
    }
}

/// Write-through cache with daily budgets and single-flight fetches.
///
/// Construct one per process and share it (e.g. behind an `Arc`); it
/// holds no global state.
pub struct CoalescingCache {
    store: Arc<dyn ValueStore>,
    budget: CallBudget,
    locks: KeyedLocks,
    soft_caps: HashMap<String, u64>,
    default_soft_cap: u64,
    default_ttl: CacheTtl,
}

impl CoalescingCache {
    /// Create a new builder.
    pub fn builder() -> CoalescingCacheBuilder {
        CoalescingCacheBuilder::new()
    }

    /// Build a cache from configuration, connecting the configured store.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = store::connect(&config.store).await?;
        let mut builder = Self::builder()
            .store(store)
            .default_soft_cap(config.budget.default_soft_cap)
            .timezone(config.budget.tz()?)
            .budget_retention(config.budget.retention())
            .default_ttl(CacheTtl::new(config.fresh_ttl(), config.stale_ttl()))
            .max_locks(config.locks.max_keys);
        for (provider, cap) in &config.budget.providers {
            builder = builder.soft_cap(provider.clone(), *cap);
        }
        builder.build()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ValueStore> {
        &self.store
    }

    /// The call budget counter.
    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    /// TTLs configured as the default for call sites.
    pub fn default_ttl(&self) -> CacheTtl {
        self.default_ttl
    }

    /// Daily soft cap for `provider`.
    pub fn soft_cap(&self, provider: &str) -> u64 {
        self.soft_caps
            .get(provider)
            .copied()
            .unwrap_or(self.default_soft_cap)
    }

    /// Fetch through the fresh/stale cache, bounded by `provider`'s budget.
    ///
    /// In order:
    /// 1. Serve the fresh copy if present.
    /// 2. If today's budget is spent, serve the stale copy, or fail with
    ///    [`UpstreamExhausted`](PropEdgeError::UpstreamExhausted).
    /// 3. Otherwise call `fetch_fn`, store both copies, count the call.
    ///
    /// Steps run under the per-key lock, so concurrent callers for the same
    /// request share one upstream call. Errors from `fetch_fn` are returned
    /// unchanged and nothing is stored or counted; retrying or degrading is
    /// the caller's decision.
    ///
    /// A zero `ttl` window is rejected as a configuration error before
    /// anything else happens.
    pub async fn fetch_with_cache<F, Fut>(
        &self,
        provider: &str,
        path: &str,
        params: &Params,
        ttl: CacheTtl,
        fetch_fn: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        ttl.validate()?;
        let fresh_key = derive_key(&fresh_prefix(provider), path, params);
        let stale_key = derive_key(&stale_prefix(provider), path, params);

        let _guard = self.locks.lock(&fresh_key).await;

        if let Some(value) = self.store.get(&fresh_key).await? {
            debug!(provider, path, "fresh cache hit");
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "fresh").increment(1);
            return Ok(value);
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "mode" => "hard_ttl").increment(1);

        let soft_cap = self.soft_cap(provider);
        if !self.budget.under_budget(provider, soft_cap).await? {
            if let Some(value) = self.store.get(&stale_key).await? {
                info!(provider, path, soft_cap, "daily budget spent, serving stale copy");
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "stale").increment(1);
                return Ok(value);
            }
            warn!(provider, path, soft_cap, "daily budget spent and no stale copy");
            metrics::counter!(telemetry::BUDGET_EXHAUSTED_TOTAL,
                "provider" => provider.to_owned(),
            )
            .increment(1);
            return Err(PropEdgeError::UpstreamExhausted {
                provider: provider.to_owned(),
            });
        }

        let value = self.call_upstream(provider, path, fetch_fn).await?;

        self.write_best_effort(&fresh_key, &value, ttl.fresh).await;
        self.write_best_effort(&stale_key, &value, ttl.stale).await;
        if let Err(e) = self.budget.increment(provider, 1).await {
            warn!(provider, error = %e, "failed to record upstream call against budget");
            metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "op" => "increment").increment(1);
        }

        Ok(value)
    }

    /// Typed variant of [`fetch_with_cache()`](Self::fetch_with_cache).
    ///
    /// The value is cached as JSON, so `T` must round-trip through serde.
    pub async fn fetch_typed<T, F, Fut>(
        &self,
        provider: &str,
        path: &str,
        params: &Params,
        ttl: CacheTtl,
        fetch_fn: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = self
            .fetch_with_cache(provider, path, params, ttl, move || async move {
                Ok::<_, PropEdgeError>(serde_json::to_value(fetch_fn().await?)?)
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_upstream<F, Fut>(&self, provider: &str, path: &str, fetch_fn: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        info!(provider, path, "calling upstream");
        let started = Instant::now();
        let result = fetch_fn().await;
        metrics::histogram!(telemetry::UPSTREAM_DURATION_SECONDS,
            "provider" => provider.to_owned(),
        )
        .record(started.elapsed().as_secs_f64());

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::UPSTREAM_CALLS_TOTAL,
            "provider" => provider.to_owned(),
            "status" => status,
        )
        .increment(1);

        if let Err(e) = &result {
            debug!(provider, path, error = %e, "upstream call failed");
        }
        result
    }

    /// Store `value`, logging instead of failing.
    ///
    /// Used after a paid-for upstream call: losing the write must not lose
    /// the value the caller is waiting on.
    pub(crate) async fn write_best_effort(&self, key: &str, value: &Value, ttl: Duration) {
        if let Err(e) = self.store.set(key, value, ttl).await {
            warn!(key, error = %e, "cache write failed");
            metrics::counter!(telemetry::STORE_ERRORS_TOTAL, "op" => "set").increment(1);
        }
    }
}

/// Builder for [`CoalescingCache`].
pub struct CoalescingCacheBuilder {
    store: Option<Arc<dyn ValueStore>>,
    soft_caps: HashMap<String, u64>,
    default_soft_cap: u64,
    default_ttl: CacheTtl,
    max_locks: u64,
    tz: Tz,
    budget_retention: Duration,
}

impl CoalescingCacheBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            soft_caps: HashMap::new(),
            default_soft_cap: DEFAULT_SOFT_CAP,
            default_ttl: CacheTtl::default(),
            max_locks: singleflight::DEFAULT_MAX_LOCKS,
            tz: Tz::UTC,
            budget_retention: DEFAULT_RETENTION,
        }
    }

    /// Use `store` for values and budget counters (default: in-process).
    pub fn store(mut self, store: Arc<dyn ValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Daily soft cap for one provider.
    pub fn soft_cap(mut self, provider: impl Into<String>, cap: u64) -> Self {
        self.soft_caps.insert(provider.into(), cap);
        self
    }

    /// Soft cap for providers without their own (default: 90).
    pub fn default_soft_cap(mut self, cap: u64) -> Self {
        self.default_soft_cap = cap;
        self
    }

    /// TTLs exposed to call sites via [`CoalescingCache::default_ttl`].
    pub fn default_ttl(mut self, ttl: CacheTtl) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Number of idle single-flight locks retained before pruning (default: 10,000).
    pub fn max_locks(mut self, max: u64) -> Self {
        self.max_locks = max;
        self
    }

    /// Timezone whose midnight starts a new budget day (default: UTC).
    pub fn timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// How long each day's budget counter is kept (default: 26h). Must be
    /// non-zero.
    pub fn budget_retention(mut self, retention: Duration) -> Self {
        self.budget_retention = retention;
        self
    }

    /// Build the cache.
    ///
    /// Fails with [`Configuration`](PropEdgeError::Configuration) if the
    /// default TTLs or the budget retention are zero: either would quietly
    /// disable caching or the daily cap.
    pub fn build(self) -> Result<CoalescingCache> {
        self.default_ttl.validate()?;
        if self.budget_retention.is_zero() {
            return Err(PropEdgeError::Configuration(
                "budget retention must be non-zero".into(),
            ));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let budget = CallBudget::new(Arc::clone(&store))
            .timezone(self.tz)
            .retention(self.budget_retention);

        Ok(CoalescingCache {
            store,
            budget,
            locks: KeyedLocks::with_max_keys(self.max_locks),
            soft_caps: self.soft_caps,
            default_soft_cap: self.default_soft_cap,
            default_ttl: self.default_ttl,
        })
    }
}

impl Default for CoalescingCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
