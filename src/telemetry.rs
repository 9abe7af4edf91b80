//! Telemetry metric name constants.
//!
//! Centralised metric names for cache operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `propedge_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: upstream provider prefix (e.g. "apisports")
//! - `tier`: which copy answered a hit: "fresh", "stale" or "swr"
//! - `mode`: access pattern: "hard_ttl" or "swr"
//! - `status`: outcome: "ok" or "error" (revalidation also uses "skipped")

/// Cache hits.
///
/// Labels: `tier` ("fresh" | "stale" | "swr").
pub const CACHE_HITS_TOTAL: &str = "propedge_cache_hits_total";

/// Cache misses that required an upstream call or failed.
///
/// Labels: `mode` ("hard_ttl" | "swr").
pub const CACHE_MISSES_TOTAL: &str = "propedge_cache_misses_total";

/// Upstream calls issued through the cache.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const UPSTREAM_CALLS_TOTAL: &str = "propedge_upstream_calls_total";

/// Upstream call duration in seconds.
///
/// Labels: `provider`.
pub const UPSTREAM_DURATION_SECONDS: &str = "propedge_upstream_duration_seconds";

/// Requests refused because the daily budget was spent and no stale copy existed.
///
/// Labels: `provider`.
pub const BUDGET_EXHAUSTED_TOTAL: &str = "propedge_budget_exhausted_total";

/// Background revalidations.
///
/// Labels: `status` ("ok" | "error" | "skipped").
pub const REVALIDATIONS_TOTAL: &str = "propedge_revalidations_total";

/// Store operations that failed and were not propagated.
///
/// Labels: `op` ("set" | "increment").
pub const STORE_ERRORS_TOTAL: &str = "propedge_store_errors_total";
