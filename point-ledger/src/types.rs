//! Core types for the point ledger
//!
//! Amounts are whole points (`u64`). Timestamps are UTC and supplied by the
//! caller for history records; balance timestamps are stamped by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User identifier (always positive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Create from an already validated value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Big-endian key bytes, ordered like the numeric value
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current point balance of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Owner
    pub user_id: UserId,

    /// Points held, `0 <= amount <= max_balance`
    pub amount: u64,

    /// Last write time
    pub last_updated: DateTime<Utc>,
}

/// Kind of balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Points added
    Charge,
    /// Points spent
    Use,
}

impl TransactionKind {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Charge => "CHARGE",
            TransactionKind::Use => "USE",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one committed charge or use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Store-assigned sequence, strictly increasing across all users
    pub id: u64,

    /// Owner
    pub user_id: UserId,

    /// Points moved (always positive)
    pub amount: u64,

    /// Charge or use
    pub kind: TransactionKind,

    /// Caller-supplied time of the operation
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_key_ordering() {
        let small = UserId::new(2);
        let large = UserId::new(256);
        assert!(small.to_key() < large.to_key());
        assert_eq!(large.to_string(), "256");
    }

    #[test]
    fn test_history_record_bincode() {
        let record = HistoryRecord {
            id: 7,
            user_id: UserId::new(1),
            amount: 50,
            kind: TransactionKind::Use,
            timestamp: Utc::now(),
        };
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: HistoryRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.kind.to_string(), "USE");
    }
}
