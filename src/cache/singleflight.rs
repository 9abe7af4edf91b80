//! Per-key single-flight gates.
//!
//! [`KeyedLocks`] hands out one async mutex per cache key. Holding the
//! guard while checking the store and calling upstream means that, within
//! one process, concurrent requests for the same uncached key make one
//! upstream call between them: the first caller fetches and stores, the
//! rest wait, then find the fresh entry.
//!
//! The table only keeps weak references. A gate stays alive exactly as long
//! as someone holds or waits on it, so it can never be dropped from under a
//! caller. Once the table reaches `max_keys`, gates nobody references are
//! pruned before a new one is inserted. The table can exceed `max_keys`
//! only while that many keys are in use at once.
//!
//! Nothing here coordinates across processes.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Default number of gates retained before pruning.
pub const DEFAULT_MAX_LOCKS: u64 = 10_000;

/// Guard for one key's gate. Dropping it releases the gate.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Table of lazily created per-key mutexes.
pub struct KeyedLocks {
    gates: std::sync::Mutex<HashMap<String, Weak<Mutex<()>>>>,
    max_keys: usize,
}

impl KeyedLocks {
    /// Create a table with the default capacity.
    pub fn new() -> Self {
        Self::with_max_keys(DEFAULT_MAX_LOCKS)
    }

    /// Create a table that prunes unused gates beyond `max` entries.
    pub fn with_max_keys(max: u64) -> Self {
        Self {
            gates: std::sync::Mutex::new(HashMap::new()),
            max_keys: usize::try_from(max).unwrap_or(usize::MAX).max(1),
        }
    }

    fn gate(&self, key: &str) -> Arc<Mutex<()>> {
        // The critical section cannot panic, so a poisoned table is still consistent.
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(gate) = gates.get(key).and_then(Weak::upgrade) {
            return gate;
        }

        if gates.len() >= self.max_keys {
            gates.retain(|_, gate| gate.strong_count() > 0);
        }

        let gate = Arc::new(Mutex::new(()));
        gates.insert(key.to_owned(), Arc::downgrade(&gate));
        gate
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.gate(key).lock_owned().await
    }

    /// Take `key` only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        self.gate(key).try_lock_owned().ok()
    }

    /// Number of entries currently in the table, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("a").await;
        assert!(locks.try_lock("a").is_none());
        drop(guard);
        assert!(locks.try_lock("a").is_some());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        assert!(locks.try_lock("b").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiter_proceeds_after_release() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("k").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn released_on_error_path() {
        async fn failing(locks: &KeyedLocks) -> Result<(), &'static str> {
            let _g = locks.lock("k").await;
            Err("boom")
        }

        let locks = KeyedLocks::new();
        assert!(failing(&locks).await.is_err());
        assert!(locks.try_lock("k").is_some());
    }

    #[tokio::test]
    async fn held_gate_survives_churn_past_capacity() {
        let locks = KeyedLocks::with_max_keys(2);
        let held = locks.lock("hot").await;

        for i in 0..100 {
            let _g = locks.lock(&format!("churn-{i}")).await;
        }

        // Still the same gate: nobody else can take it.
        assert!(locks.try_lock("hot").is_none());
        drop(held);
        assert!(locks.try_lock("hot").is_some());
    }

    #[tokio::test]
    async fn released_gates_are_pruned_at_capacity() {
        let locks = KeyedLocks::with_max_keys(4);
        for i in 0..100 {
            let _g = locks.lock(&format!("k{i}")).await;
        }
        assert!(locks.len() <= 4);
    }

    #[tokio::test]
    async fn table_grows_past_capacity_only_while_gates_are_held() {
        let locks = KeyedLocks::with_max_keys(2);
        assert!(locks.is_empty());

        let guards: Vec<_> = (0..5).map(|i| locks.try_lock(&format!("k{i}")).unwrap()).collect();
        assert_eq!(locks.len(), 5);

        drop(guards);
        let _g = locks.lock("fresh").await;
        assert_eq!(locks.len(), 1);
    }
}
