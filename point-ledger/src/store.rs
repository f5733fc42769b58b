//! Ledger store interface and the in-memory backend
//!
//! The service treats the store as a synchronous key-value collaborator. A
//! store only guarantees each call is atomic on its own; ordering across calls
//! for one user is the gate's job.

use crate::{
    config::LatencyConfig,
    types::{Balance, HistoryRecord, TransactionKind, UserId},
    Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Balance and history persistence consumed by the point service
pub trait LedgerStore: Send + Sync {
    /// Current balance, `None` when the user has no record
    fn read(&self, user_id: UserId) -> Result<Option<Balance>>;

    /// Overwrite the stored balance and stamp `last_updated`
    fn write(&self, user_id: UserId, amount: u64) -> Result<Balance>;

    /// Append one immutable history record
    fn append_history(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionKind,
        timestamp: DateTime<Utc>,
    ) -> Result<HistoryRecord>;

    /// All records for the user, in insertion order
    fn list_history(&self, user_id: UserId) -> Result<Vec<HistoryRecord>>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    balances: DashMap<UserId, Balance>,
    history: RwLock<Vec<HistoryRecord>>,
    next_id: AtomicU64,
    latency: Option<LatencyConfig>,
}

impl MemoryStore {
    /// Empty store without artificial delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep a random duration from `latency` on every call
    ///
    /// Widens race windows in contention tests.
    pub fn with_latency(latency: LatencyConfig) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            let millis = rand::thread_rng().gen_range(latency.min_ms..=latency.max_ms);
            if millis == 0 {
                return;
            }
            let delay = Duration::from_millis(millis);
            // Hand this worker's other tasks off before blocking it.
            match Handle::try_current() {
                Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| std::thread::sleep(delay))
                }
                _ => std::thread::sleep(delay),
            }
        }
    }
}

impl LedgerStore for MemoryStore {
    fn read(&self, user_id: UserId) -> Result<Option<Balance>> {
        self.simulate_latency();
        Ok(self.balances.get(&user_id).map(|entry| entry.value().clone()))
    }

    fn write(&self, user_id: UserId, amount: u64) -> Result<Balance> {
        self.simulate_latency();
        let balance = Balance {
            user_id,
            amount,
            last_updated: Utc::now(),
        };
        self.balances.insert(user_id, balance.clone());
        Ok(balance)
    }

    fn append_history(
        &self,
        user_id: UserId,
        amount: u64,
        kind: TransactionKind,
        timestamp: DateTime<Utc>,
    ) -> Result<HistoryRecord> {
        self.simulate_latency();
        let mut history = self.history.write();
        let record = HistoryRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id,
            amount,
            kind,
            timestamp,
        };
        history.push(record.clone());
        Ok(record)
    }

    fn list_history(&self, user_id: UserId) -> Result<Vec<HistoryRecord>> {
        self.simulate_latency();
        Ok(self
            .history
            .read()
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }
}
