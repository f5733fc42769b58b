//! Point Ledger
//!
//! Per-user point balances with a configured cap and an append-only history,
//! mutated through `charge` and `use` operations.
//!
//! # Architecture
//!
//! - **Key-Scoped Gate**: Mutations on one user are serialized, different
//!   users run in parallel
//! - **Lazy Lock Table**: Per-user lock entries are created on demand and
//!   reclaimed when idle, reference counted so teardown never races a waiter
//! - **Pluggable Store**: In-memory or RocksDB backends behind one trait
//!
//! # Invariants
//!
//! - Bounded balance: 0 <= balance <= max_balance after every commit
//! - No lost updates: same-user mutations observe a total order
//! - History fidelity: exactly one record per committed mutation, none for
//!   rejected ones

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod store;
pub mod storage;
pub mod gate;
pub mod service;
pub mod validation;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{Balance, HistoryRecord, TransactionKind, UserId};
pub use store::{LedgerStore, MemoryStore};
pub use storage::RocksStore;
pub use gate::{GatePermit, KeyedGate};
pub use service::PointService;
pub use config::Config;
pub use metrics::Metrics;
