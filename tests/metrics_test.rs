//! Tests for cache and budget metrics.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;

use propedge::{CacheTtl, CoalescingCache, MemoryStore, Params, PropEdgeError, ValueStore, telemetry};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Counter value for `name` with label `label = value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn params() -> Params {
    let mut p = Params::new();
    p.insert("team".into(), json!(7));
    p
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` keeps the sync `with_local_recorder` closure on the
/// current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn miss_then_hit_records_upstream_and_hit_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = CoalescingCache::builder().build().unwrap();
                for _ in 0..2 {
                    cache
                        .fetch_with_cache("apisports", "/games", &params(), CacheTtl::default(), || async {
                            Ok(json!({"response": []}))
                        })
                        .await
                        .unwrap();
                }
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::UPSTREAM_CALLS_TOTAL, "status", "ok"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_MISSES_TOTAL, "mode", "hard_ttl"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "tier", "fresh"),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::UPSTREAM_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn failed_fetch_records_error_status() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = CoalescingCache::builder().build().unwrap();
                cache
                    .fetch_with_cache("apisports", "/games", &params(), CacheTtl::default(), || async {
                        Err(PropEdgeError::Http("connection reset".into()))
                    })
                    .await
            })
        })
    });
    assert!(result.is_err());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::UPSTREAM_CALLS_TOTAL, "status", "error"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn exhausted_budget_records_stale_hit_or_exhaustion() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let store: Arc<dyn ValueStore> = Arc::new(MemoryStore::new());
                let stale_key = propedge::derive_key(
                    &propedge::cache::stale_prefix("apisports"),
                    "/games",
                    &params(),
                );
                store
                    .set(&stale_key, &json!("old"), Duration::from_secs(60))
                    .await
                    .unwrap();
                let cache = CoalescingCache::builder()
                    .store(store)
                    .soft_cap("apisports", 0)
                    .build()
                    .unwrap();

                let served = cache
                    .fetch_with_cache("apisports", "/games", &params(), CacheTtl::default(), || async {
                        Ok(json!("new"))
                    })
                    .await;
                assert_eq!(served.unwrap(), json!("old"));

                let mut other = Params::new();
                other.insert("team".into(), json!(8));
                let missing = cache
                    .fetch_with_cache("apisports", "/games", &other, CacheTtl::default(), || async {
                        Ok(json!("new"))
                    })
                    .await;
                assert!(matches!(missing, Err(PropEdgeError::UpstreamExhausted { .. })));
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "tier", "stale"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::BUDGET_EXHAUSTED_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::UPSTREAM_CALLS_TOTAL), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn swr_records_miss_then_hit() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = CoalescingCache::builder().build().unwrap();
                for _ in 0..2 {
                    cache
                        .fetch_swr("trends:7", Duration::from_secs(60), Duration::from_secs(600), || async {
                            Ok(json!({"rate": 0.6}))
                        })
                        .await
                        .unwrap();
                }
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_MISSES_TOTAL, "mode", "swr"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::CACHE_HITS_TOTAL, "tier", "swr"),
        1
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let cache = CoalescingCache::builder().build().unwrap();
    cache
        .fetch_with_cache("apisports", "/games", &params(), CacheTtl::default(), || async {
            Ok(json!(1))
        })
        .await
        .unwrap();
}
