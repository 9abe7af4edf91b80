//! Batch cache warming.
//!
//! A [`Warmer`] pushes a list of known requests through
//! [`CoalescingCache::fetch_with_cache`] ahead of user traffic, so that
//! reads later in the day hit the fresh copy. Warming spends budget like
//! any other caller and stops calling upstream once the budget is gone.
//! One failed target never aborts the batch.
//!
//! Scheduling (when to warm) is left to the host process.

use std::future::Future;
use std::sync::Arc;

use futures_util::{StreamExt, stream};
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{CacheTtl, CoalescingCache, Params};
use crate::{PropEdgeError, Result};

/// Default number of targets fetched concurrently.
pub const DEFAULT_WARM_CONCURRENCY: usize = 4;

/// One request to pre-populate.
#[derive(Debug, Clone)]
pub struct WarmTarget {
    pub provider: String,
    pub path: String,
    pub params: Params,
    pub ttl: CacheTtl,
}

impl WarmTarget {
    pub fn new(provider: impl Into<String>, path: impl Into<String>, params: Params, ttl: CacheTtl) -> Self {
        Self {
            provider: provider.into(),
            path: path.into(),
            params,
            ttl,
        }
    }
}

/// A target that could not be warmed.
#[derive(Debug, Clone)]
pub struct WarmFailure {
    pub provider: String,
    pub path: String,
    pub error: String,
}

/// Outcome of one warming run.
#[derive(Debug, Clone, Default)]
pub struct WarmReport {
    /// Targets now cached (fetched, or already fresh/stale).
    pub warmed: usize,
    /// Targets skipped because the provider's budget was spent.
    pub exhausted: usize,
    /// Targets whose upstream call failed.
    pub failed: Vec<WarmFailure>,
}

/// Pre-populates the cache for a batch of targets.
pub struct Warmer {
    cache: Arc<CoalescingCache>,
    concurrency: usize,
}

impl Warmer {
    pub fn new(cache: Arc<CoalescingCache>) -> Self {
        Self {
            cache,
            concurrency: DEFAULT_WARM_CONCURRENCY,
        }
    }

    /// Limit concurrent targets (minimum 1).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Warm every target, calling `fetcher` for those that miss.
    ///
    /// `fetcher` builds the upstream future for a target; it is only polled
    /// when the cache decides an upstream call is needed.
    pub async fn warm<F, Fut>(&self, targets: &[WarmTarget], fetcher: F) -> WarmReport
    where
        F: Fn(&WarmTarget) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let fetcher = &fetcher;
        let outcomes: Vec<(&WarmTarget, Result<Value>)> = stream::iter(targets)
            .map(|target| async move {
                let fut = fetcher(target);
                let outcome = self
                    .cache
                    .fetch_with_cache(&target.provider, &target.path, &target.params, target.ttl, || fut)
                    .await;
                (target, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = WarmReport::default();
        for (target, outcome) in outcomes {
            match outcome {
                Ok(_) => report.warmed += 1,
                Err(PropEdgeError::UpstreamExhausted { .. }) => report.exhausted += 1,
                Err(e) => {
                    warn!(provider = %target.provider, path = %target.path, error = %e, "warm target failed");
                    report.failed.push(WarmFailure {
                        provider: target.provider.clone(),
                        path: target.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            warmed = report.warmed,
            exhausted = report.exhausted,
            failed = report.failed.len(),
            "cache warm finished"
        );
        report
    }
}
