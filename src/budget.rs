//! Per-provider daily call budget.
//!
//! Each provider gets one counter per calendar day, keyed
//! `"{provider}:count:{YYYYMMDD}"`. A new day produces a new key, so there
//! is no reset operation; yesterday's counter simply expires after the
//! retention window (26h by default, which covers restarts around
//! midnight).
//!
//! Counting is exactly as atomic as the backing store: atomic across
//! workers on the durable backend, per-process on the in-memory one.
//! Checking and incrementing are separate operations, so two concurrent
//! first fetches may both pass the check before either increments. The
//! resulting overshoot is bounded by the number of concurrent workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;

use crate::Result;
use crate::store::ValueStore;

/// Default retention for per-day counters.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(26 * 3600);

/// Counter of upstream calls per provider per calendar day.
#[derive(Clone)]
pub struct CallBudget {
    store: Arc<dyn ValueStore>,
    tz: Tz,
    retention: Duration,
}

impl CallBudget {
    /// Budget over `store`, with days starting at UTC midnight.
    pub fn new(store: Arc<dyn ValueStore>) -> Self {
        Self {
            store,
            tz: Tz::UTC,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Use `tz` midnight as the day boundary.
    pub fn timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Keep each day's counter for `retention`.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// The current budget day in the configured timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    /// Calls made today for `provider`.
    pub async fn count_for_today(&self, provider: &str) -> Result<u64> {
        self.count_for_day(provider, self.today()).await
    }

    /// Calls recorded for `provider` on `day`.
    pub async fn count_for_day(&self, provider: &str, day: NaiveDate) -> Result<u64> {
        self.store.counter(&day_key(provider, day)).await
    }

    /// Record `n` calls for `provider` today. Returns the new count.
    pub async fn increment(&self, provider: &str, n: u64) -> Result<u64> {
        self.increment_for_day(provider, self.today(), n).await
    }

    /// Record `n` calls for `provider` on `day`. Returns the new count.
    pub async fn increment_for_day(&self, provider: &str, day: NaiveDate, n: u64) -> Result<u64> {
        self.store
            .increment(&day_key(provider, day), n, self.retention)
            .await
    }

    /// Whether `provider` may make another call today.
    pub async fn under_budget(&self, provider: &str, soft_cap: u64) -> Result<bool> {
        Ok(self.count_for_today(provider).await? < soft_cap)
    }
}

/// Counter key for `provider` on `day`.
pub fn day_key(provider: &str, day: NaiveDate) -> String {
    format!("{provider}:count:{}", day.format("%Y%m%d"))
}
