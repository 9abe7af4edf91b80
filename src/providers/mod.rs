//! Upstream data providers.
//!
//! Providers perform the raw HTTP calls and hand them to the
//! [`CoalescingCache`](crate::CoalescingCache) as fetch callbacks; they
//! never cache on their own.

pub mod apisports;

pub use apisports::{ApiSportsAuth, ApiSportsClient, ApiSportsConfig};
