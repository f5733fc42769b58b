//! Key-scoped mutation gate
//!
//! Serializes mutations per key while letting unrelated keys run in parallel.
//! Lock entries are created on first use and reclaimed once nothing holds or
//! awaits them.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                 KeyedGate<K>                           │
//! │   DashMap<K, Slot { lock: Arc<Mutex<()>>, holders }>   │
//! └───────────┬───────────────────────────────┬───────────┘
//!             │ 1. entry().or_insert()        │ 5. entry(): holders -= 1,
//!             │    holders += 1 (shard lock)  │    remove when 0 (shard lock)
//!             ▼                               │
//!      2. lock_owned().await (FIFO)           │
//!             │                               │
//!             ▼                               │
//!      3. operation()  ──► 4. unlock ─────────┘
//! ```
//!
//! # Invariants
//!
//! - At most one critical section per key at any instant
//! - An entry is removed only when its holder count reaches zero, under the
//!   same shard lock that registers new holders, so a late arrival either
//!   queues on the live handle or creates a fresh one that nobody else can
//!   still be holding or awaiting
//! - Waiters on one key are served in arrival order
//!
//! The gate is not reentrant: acquiring a key twice from the same task
//! deadlocks. Without a timeout a hung operation stalls every queued caller
//! for its key.

use crate::{metrics::Metrics, Error, Result};
use dashmap::{mapref::entry::Entry, DashMap};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table entry
struct Slot {
    /// Shared handle every caller for the key queues on
    lock: Arc<Mutex<()>>,

    /// Callers holding or awaiting `lock`
    holders: usize,
}

impl Slot {
    fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            holders: 0,
        }
    }
}

/// Per-key mutual exclusion with lazily created, reference counted entries
pub struct KeyedGate<K>
where
    K: Eq + Hash + Clone,
{
    slots: Arc<DashMap<K, Slot>>,
    acquire_timeout: Option<Duration>,
    metrics: Option<Metrics>,
}

impl<K> KeyedGate<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create a gate; `acquire_timeout` bounds each wait when set
    pub fn new(acquire_timeout: Option<Duration>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            acquire_timeout,
            metrics: None,
        }
    }

    /// Report wait times and table size
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `operation` while holding the lock for `key`
    ///
    /// The lock is released whether the operation succeeds, fails or is
    /// dropped mid-flight. The operation's result is returned unchanged.
    pub async fn with_exclusive_access<F, Fut, T>(&self, key: K, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.acquire(key).await?;
        let outcome = operation().await;
        drop(permit);
        outcome
    }

    /// Wait for the lock on `key` and return a permit that releases it on drop
    pub async fn acquire(&self, key: K) -> Result<GatePermit<K>> {
        let registration = self.register(key);
        let lock = Arc::clone(&registration.lock);
        let started = Instant::now();

        let guard = match self.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, lock.lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::warn!(
                        key = ?registration.key,
                        timeout_ms = limit.as_millis() as u64,
                        "Gate acquisition timed out"
                    );
                    // Dropping the registration undoes it.
                    return Err(Error::Timeout(format!(
                        "key {:?} not acquired within {:?}",
                        registration.key, limit
                    )));
                }
            },
            None => lock.lock_owned().await,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_gate_wait(started.elapsed().as_secs_f64());
        }

        Ok(GatePermit {
            _guard: guard,
            registration,
        })
    }

    /// Number of live lock entries
    pub fn active_keys(&self) -> usize {
        self.slots.len()
    }

    /// Callers currently holding or awaiting `key`
    pub fn holders(&self, key: &K) -> usize {
        self.slots.get(key).map(|slot| slot.holders).unwrap_or(0)
    }

    /// Get-or-create the entry and count this caller in, as one step
    fn register(&self, key: K) -> Registration<K> {
        let lock = {
            let mut slot = self.slots.entry(key.clone()).or_insert_with(|| {
                if let Some(metrics) = &self.metrics {
                    metrics.gate_active_keys.inc();
                }
                Slot::new()
            });
            slot.holders += 1;
            Arc::clone(&slot.lock)
        };

        Registration {
            slots: Arc::clone(&self.slots),
            key,
            lock,
            metrics: self.metrics.clone(),
        }
    }
}

impl<K> fmt::Debug for KeyedGate<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedGate")
            .field("active_keys", &self.slots.len())
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// One caller's claim on a lock entry
struct Registration<K>
where
    K: Eq + Hash + Clone,
{
    slots: Arc<DashMap<K, Slot>>,
    key: K,
    lock: Arc<Mutex<()>>,
    metrics: Option<Metrics>,
}

impl<K> Drop for Registration<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Entry::Occupied(mut occupied) = self.slots.entry(self.key.clone()) {
            // Only tear down the handle this caller registered on.
            if !Arc::ptr_eq(&occupied.get().lock, &self.lock) {
                return;
            }

            let slot = occupied.get_mut();
            slot.holders -= 1;
            if slot.holders == 0 {
                occupied.remove();
                if let Some(metrics) = &self.metrics {
                    metrics.gate_active_keys.dec();
                }
            }
        }
    }
}

/// Exclusive access to one key, released on drop
#[must_use = "the lock is released as soon as the permit is dropped"]
pub struct GatePermit<K>
where
    K: Eq + Hash + Clone,
{
    // Declared first so the lock is released before the entry is reclaimed.
    _guard: OwnedMutexGuard<()>,
    registration: Registration<K>,
}

impl<K> GatePermit<K>
where
    K: Eq + Hash + Clone,
{
    /// Key this permit guards
    pub fn key(&self) -> &K {
        &self.registration.key
    }
}

impl<K> fmt::Debug for GatePermit<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePermit")
            .field("key", &self.registration.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    async fn wait_for_holders(gate: &KeyedGate<u64>, key: u64, expected: usize) {
        for _ in 0..10_000 {
            if gate.holders(&key) == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!(
            "key {} never reached {} holders (saw {})",
            key,
            expected,
            gate.holders(&key)
        );
    }

    #[tokio::test]
    async fn test_entry_reclaimed_after_release() {
        let gate = KeyedGate::new(None);

        let permit = gate.acquire(1u64).await.unwrap();
        assert_eq!(permit.key(), &1);
        assert_eq!(gate.active_keys(), 1);
        assert_eq!(gate.holders(&1), 1);

        drop(permit);
        assert_eq!(gate.active_keys(), 0);
        assert_eq!(gate.holders(&1), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let gate = KeyedGate::new(Some(Duration::from_millis(50)));

        let _first = gate.acquire(1u64).await.unwrap();
        let second = gate.acquire(2u64).await;
        assert!(second.is_ok());
        assert_eq!(gate.active_keys(), 2);
    }

    #[tokio::test]
    async fn test_release_and_reacquire_interleaving() {
        let gate = Arc::new(KeyedGate::new(None));

        // A holds the key.
        let first = gate.acquire(7u64).await.unwrap();

        // B fetches the same handle and queues behind A.
        let (acquired_tx, acquired_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let permit = gate.acquire(7u64).await.unwrap();
                acquired_tx.send(()).unwrap();
                release_rx.await.unwrap();
                drop(permit);
            })
        };
        wait_for_holders(&gate, 7, 2).await;

        // A releases. Its teardown must leave the entry for B.
        drop(first);
        assert_eq!(gate.active_keys(), 1);
        acquired_rx.await.unwrap();
        assert_eq!(gate.holders(&7), 1);

        // C arrives after A's teardown while B still runs: it must queue on
        // B's handle rather than install a new one.
        let late = tokio::time::timeout(Duration::from_millis(50), gate.acquire(7u64)).await;
        assert!(late.is_err());
        assert_eq!(gate.holders(&7), 1);
        assert_eq!(gate.active_keys(), 1);

        release_tx.send(()).unwrap();
        waiter.await.unwrap();
        assert_eq!(gate.active_keys(), 0);

        let again = gate.acquire(7u64).await.unwrap();
        drop(again);
        assert_eq!(gate.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_timeout_deregisters_waiter() {
        let gate = KeyedGate::new(Some(Duration::from_millis(20)));

        let held = gate.acquire(3u64).await.unwrap();
        let err = gate.acquire(3u64).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_retryable());
        assert_eq!(gate.holders(&3), 1);

        drop(held);
        assert_eq!(gate.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_aborted_waiter_deregisters() {
        let gate = Arc::new(KeyedGate::new(None));
        let held = gate.acquire(4u64).await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.acquire(4u64).await;
            })
        };
        wait_for_holders(&gate, 4, 2).await;

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(gate.holders(&4), 1);

        drop(held);
        assert_eq!(gate.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_failed_operation_releases_lock() {
        let gate = KeyedGate::new(Some(Duration::from_millis(50)));

        let result: Result<()> = gate
            .with_exclusive_access(5u64, || async { Err(Error::InvalidAmount(0)) })
            .await;
        assert!(matches!(result, Err(Error::InvalidAmount(0))));
        assert_eq!(gate.active_keys(), 0);

        let value = gate
            .with_exclusive_access(5u64, || async { Ok(11) })
            .await
            .unwrap();
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn test_waiters_served_in_arrival_order() {
        let gate = Arc::new(KeyedGate::new(None));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let held = gate.acquire(9u64).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5usize {
            let task_gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = task_gate.acquire(9u64).await.unwrap();
                order.lock().push(i);
            }));
            // Single-threaded runtime: the task is queued once it is counted.
            wait_for_holders(&gate, 9, i + 2).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(gate.active_keys(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_mutual_exclusion_under_entry_churn() {
        let gate = Arc::new(KeyedGate::new(None));
        let inside = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let gate = Arc::clone(&gate);
            let inside = Arc::clone(&inside);
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let inside = Arc::clone(&inside);
                    gate.with_exclusive_access(1u64, move || async move {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::task::yield_now().await;
                        assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                        Ok(())
                    })
                    .await
                    .unwrap();
                    completed.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(completed.load(Ordering::SeqCst), 32 * 50);
        assert_eq!(gate.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_metrics_track_table_size() {
        let metrics = Metrics::new().unwrap();
        let gate = KeyedGate::new(None).with_metrics(metrics.clone());

        let a = gate.acquire(1u64).await.unwrap();
        let b = gate.acquire(2u64).await.unwrap();
        assert_eq!(metrics.gate_active_keys.get(), 2);

        drop(a);
        drop(b);
        assert_eq!(metrics.gate_active_keys.get(), 0);
        assert_eq!(metrics.gate_wait.get_sample_count(), 2);
    }
}
