//! Point service orchestration layer
//!
//! Ties validation, the per-user gate and the ledger store together. Every
//! mutation runs read-check-write-append under the user's gate entry; reads
//! bypass the gate.
//!
//! # Example
//!
//! ```no_run
//! use point_ledger::{Config, PointService};
//!
//! #[tokio::main]
//! async fn main() -> point_ledger::Result<()> {
//!     let service = PointService::open(&Config::default())?;
//!
//!     service.open_account(1).await?;
//!     let balance = service.charge(1, 100, chrono::Utc::now()).await?;
//!     assert_eq!(balance.amount, 100);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    config::StorageBackend,
    gate::KeyedGate,
    metrics::Metrics,
    storage::RocksStore,
    store::{LedgerStore, MemoryStore},
    types::{Balance, HistoryRecord, TransactionKind, UserId},
    validation::{validate_amount, validate_user_id},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Charge/use service over a ledger store
pub struct PointService {
    /// Balance and history persistence
    store: Arc<dyn LedgerStore>,

    /// Per-user serialization of mutations
    gate: KeyedGate<UserId>,

    /// Balance cap
    max_balance: u64,

    /// Prometheus collectors
    metrics: Metrics,
}

impl PointService {
    /// Open the configured store and build the service over it
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn LedgerStore> = match config.storage.backend {
            StorageBackend::Memory => match config.storage.simulated_latency {
                Some(latency) => Arc::new(MemoryStore::with_latency(latency)),
                None => Arc::new(MemoryStore::new()),
            },
            StorageBackend::RocksDb => Arc::new(RocksStore::open(&config.storage)?),
        };

        tracing::info!(
            service = %config.service_name,
            backend = ?config.storage.backend,
            max_balance = config.max_balance,
            "Point service opened"
        );

        Self::new(store, config)
    }

    /// Build the service over an existing store
    pub fn new(store: Arc<dyn LedgerStore>, config: &Config) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let gate = KeyedGate::new(config.gate.acquire_timeout()).with_metrics(metrics.clone());

        Ok(Self {
            store,
            gate,
            max_balance: config.max_balance,
            metrics,
        })
    }

    /// Configured balance cap
    pub fn max_balance(&self) -> u64 {
        self.max_balance
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Mutation gate (exposed for inspection)
    pub fn gate(&self) -> &KeyedGate<UserId> {
        &self.gate
    }

    /// Create a zero balance for a new user
    pub async fn open_account(&self, user_id: i64) -> Result<Balance> {
        let user_id = validate_user_id(user_id)?;

        self.gate
            .with_exclusive_access(user_id, move || async move {
                if self.store.read(user_id)?.is_some() {
                    return Err(Error::AlreadyExists(user_id));
                }
                let balance = self.store.write(user_id, 0)?;
                tracing::info!(user_id = %user_id, "Account opened");
                Ok(balance)
            })
            .await
    }

    /// Add `amount` points, failing if the result would exceed the cap
    pub async fn charge(&self, user_id: i64, amount: i64, at: DateTime<Utc>) -> Result<Balance> {
        let outcome = self.mutate(TransactionKind::Charge, user_id, amount, at).await;
        self.observe(TransactionKind::Charge, &outcome);
        outcome
    }

    /// Spend `amount` points, failing if the balance is too small
    pub async fn use_points(
        &self,
        user_id: i64,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Balance> {
        let outcome = self.mutate(TransactionKind::Use, user_id, amount, at).await;
        self.observe(TransactionKind::Use, &outcome);
        outcome
    }

    /// Current balance (not gated)
    pub fn get_balance(&self, user_id: i64) -> Result<Balance> {
        let user_id = validate_user_id(user_id)?;
        self.store.read(user_id)?.ok_or(Error::NotFound(user_id))
    }

    /// History in insertion order (not gated)
    ///
    /// Users without a balance record are `NotFound`; an opened account with
    /// no mutations yields an empty list.
    pub fn get_history(&self, user_id: i64) -> Result<Vec<HistoryRecord>> {
        let user_id = validate_user_id(user_id)?;
        if self.store.read(user_id)?.is_none() {
            return Err(Error::NotFound(user_id));
        }
        self.store.list_history(user_id)
    }

    async fn mutate(
        &self,
        kind: TransactionKind,
        user_id: i64,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Balance> {
        let user_id = validate_user_id(user_id)?;
        let amount = validate_amount(amount)?;

        self.gate
            .with_exclusive_access(user_id, move || async move {
                self.apply(kind, user_id, amount, at)
            })
            .await
    }

    /// Read-check-write-append; must run under the user's gate entry
    fn apply(
        &self,
        kind: TransactionKind,
        user_id: UserId,
        amount: u64,
        at: DateTime<Utc>,
    ) -> Result<Balance> {
        let current = self.store.read(user_id)?.ok_or(Error::NotFound(user_id))?.amount;

        let new_amount = match kind {
            TransactionKind::Charge => current
                .checked_add(amount)
                .filter(|total| *total <= self.max_balance)
                .ok_or(Error::LimitExceeded {
                    user_id,
                    current,
                    amount,
                    max_balance: self.max_balance,
                })?,
            TransactionKind::Use => current
                .checked_sub(amount)
                .ok_or(Error::InsufficientFunds {
                    user_id,
                    current,
                    amount,
                })?,
        };

        // Balance first, then history. A failed append restores the previous
        // balance; only a crash in between loses the record.
        let updated = self.store.write(user_id, new_amount)?;
        let record = match self.store.append_history(user_id, amount, kind, at) {
            Ok(record) => record,
            Err(err) => {
                if let Err(restore_err) = self.store.write(user_id, current) {
                    tracing::error!(
                        user_id = %user_id,
                        balance = new_amount,
                        expected = current,
                        error = %restore_err,
                        "Failed to restore balance after history append error"
                    );
                }
                return Err(err);
            }
        };

        tracing::debug!(
            user_id = %user_id,
            kind = %kind,
            amount,
            balance = updated.amount,
            history_id = record.id,
            "Points mutated"
        );

        Ok(updated)
    }

    fn observe(&self, kind: TransactionKind, outcome: &Result<Balance>) {
        let operation = match kind {
            TransactionKind::Charge => "charge",
            TransactionKind::Use => "use",
        };

        match outcome {
            Ok(_) => match kind {
                TransactionKind::Charge => self.metrics.record_charge(),
                TransactionKind::Use => self.metrics.record_use(),
            },
            Err(err) => {
                self.metrics.record_rejection(operation, err.reason());
                tracing::warn!(operation, reason = err.reason(), error = %err, "Mutation rejected");
            }
        }
    }
}

impl std::fmt::Debug for PointService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointService")
            .field("gate", &self.gate)
            .field("max_balance", &self.max_balance)
            .finish()
    }
}
