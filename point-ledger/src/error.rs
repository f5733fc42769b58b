//! Error types for the point ledger

use crate::types::UserId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// User identifier is not a positive integer
    #[error("Invalid user id: {0}")]
    InvalidUserId(i64),

    /// Amount is not a positive integer
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// No balance record for the user
    #[error("Balance not found for user {0}")]
    NotFound(UserId),

    /// Balance record already present
    #[error("Balance already exists for user {0}")]
    AlreadyExists(UserId),

    /// Charge would push the balance over the configured maximum
    #[error("Balance limit exceeded for user {user_id}: {current} + {amount} > {max_balance}")]
    LimitExceeded {
        /// User being charged
        user_id: UserId,
        /// Balance before the charge
        current: u64,
        /// Requested charge
        amount: u64,
        /// Configured cap
        max_balance: u64,
    },

    /// Use would push the balance below zero
    #[error("Insufficient funds for user {user_id}: {current} < {amount}")]
    InsufficientFunds {
        /// User being debited
        user_id: UserId,
        /// Balance before the use
        current: u64,
        /// Requested use
        amount: u64,
    },

    /// Gate acquisition did not complete within the configured wait
    #[error("Timed out waiting for exclusive access: {0}")]
    Timeout(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether repeating the whole gated call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Short label used for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidUserId(_) => "invalid_user_id",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::LimitExceeded { .. } => "limit_exceeded",
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::Timeout(_) => "timeout",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Metrics(_) => "metrics",
            Error::Io(_) => "io",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_retryable() {
        assert!(Error::Timeout("user 1".to_string()).is_retryable());
        assert!(!Error::NotFound(UserId::new(1)).is_retryable());
        assert!(!Error::InvalidAmount(0).is_retryable());
    }

    #[test]
    fn test_limit_exceeded_message() {
        let err = Error::LimitExceeded {
            user_id: UserId::new(3),
            current: 700,
            amount: 400,
            max_balance: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Balance limit exceeded for user 3: 700 + 400 > 1000"
        );
        assert_eq!(err.reason(), "limit_exceeded");
    }
}
