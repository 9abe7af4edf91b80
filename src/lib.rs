//! propedge - budget-aware caching for player-prop data providers
//!
//! Every upstream fetch (odds, player trends, schedules) goes through a
//! [`CoalescingCache`], which bounds how often each provider is called:
//!
//! - fresh/stale copies per request, so a spent daily budget degrades to
//!   slightly outdated data instead of an error
//! - a per-provider, per-calendar-day call counter ([`CallBudget`])
//! - single-flight locking so concurrent identical requests share one call
//! - a stale-while-revalidate mode for latency-sensitive reads
//!
//! The store behind it is either in-process ([`store::MemoryStore`]) or
//! shared across worker processes ([`store::RedisStore`], `redis` feature),
//! chosen once at startup from [`Config`].
//!
//! # Example
//!
//! ```rust,no_run
//! use propedge::{CacheTtl, CoalescingCache, Config, Params};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> propedge::Result<()> {
//!     let config = Config::load_or_default(None)?.apply_env();
//!     let cache = CoalescingCache::from_config(&config).await?;
//!
//!     let mut params = Params::new();
//!     params.insert("player".into(), json!(1234));
//!     params.insert("season".into(), json!(2025));
//!
//!     let stats = cache
//!         .fetch_with_cache("apisports", "/players/statistics", &params, CacheTtl::default(), || async {
//!             // call the provider here
//!             Ok(json!({"response": []}))
//!         })
//!         .await?;
//!
//!     println!("{stats}");
//!     Ok(())
//! }
//! ```

pub mod budget;
pub mod cache;
pub mod config;
pub mod edge;
pub mod error;
#[cfg(feature = "apisports")]
pub mod providers;
pub mod store;
pub mod telemetry;
pub mod warm;

// Re-export main types at crate root
pub use budget::CallBudget;
pub use cache::{
    CacheTtl, CoalescingCache, CoalescingCacheBuilder, KeyedLocks, Params, derive_key,
};
pub use config::Config;
pub use edge::{Edge, PriceQuote, american_to_prob, hit_rate};
pub use error::{PropEdgeError, Result};
pub use store::{MemoryStore, ValueStore};
pub use warm::{WarmReport, WarmTarget, Warmer};
