//! Error types for the ledger store

use rocksdb::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Product not found
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// A debit would drive the balance below zero
    #[error("Insufficient balance for user {user_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        /// Debited user
        user_id: Uuid,
        /// Balance at the time of the debit
        balance: u64,
        /// Amount the debit needed
        required: u64,
    },

    /// Malformed ledger entry (zero amount, sign/kind mismatch, overflow)
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Invariant violation (conservation, hash chain, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Lock timeout, deadlock or write conflict. The transaction was rolled back
    /// and may be retried as a whole.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Error::Conflict(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// Errors that can tell whether re-running the whole transaction may succeed.
///
/// [`crate::Ledger::transact`] uses this to decide on a retry, so error types
/// of higher layers that wrap [`Error`] implement it by delegation.
pub trait Retryable {
    /// True when the failure came from lock contention rather than the data
    fn is_conflict(&self) -> bool;
}

impl Retryable for Error {
    fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        assert!(Error::Conflict("lock timeout".into()).is_conflict());
        assert!(!Error::Storage("corruption".into()).is_conflict());
        assert!(!Error::InsufficientBalance {
            user_id: Uuid::nil(),
            balance: 1,
            required: 2,
        }
        .is_conflict());
    }

    #[test]
    fn test_insufficient_balance_message() {
        let err = Error::InsufficientBalance {
            user_id: Uuid::nil(),
            balance: 100,
            required: 250,
        };
        assert!(err.to_string().contains("balance 100, required 250"));
    }
}
