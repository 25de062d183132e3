//! Error types for the escrow engine

use ledger_core::{OrderStatus, Retryable};
use thiserror::Error;
use uuid::Uuid;

/// Result type for escrow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Escrow errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger or store error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Malformed or missing input, rejected before any transaction opens
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller lacks the role or ownership the operation needs
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity missing or not visible to the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transition not allowed from the order's current status
    #[error("Cannot {action} order {order_id} in status {status}")]
    InvalidTransition {
        /// Order
        order_id: Uuid,
        /// Status the order is in
        status: OrderStatus,
        /// Attempted action
        action: &'static str,
    },

    /// Not enough units left
    #[error("Insufficient stock for product {product_id}: {available} available, {requested} requested")]
    InsufficientStock {
        /// Product
        product_id: Uuid,
        /// Units on hand
        available: u32,
        /// Units requested
        requested: u32,
    },

    /// Buyer owns the product
    #[error("Cannot purchase own product {0}")]
    SelfPurchase(Uuid),

    /// Product is hidden or deleted
    #[error("Product {0} is not available for purchase")]
    ProductUnavailable(Uuid),

    /// Caller account is deleted, suspended or banned
    #[error("Account {user_id} is {status}")]
    AccountUnavailable {
        /// Account
        user_id: Uuid,
        /// Current standing
        status: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error classes exposed to the API layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input
    Validation,
    /// Wrong state, ownership, stock or balance. Nothing was changed.
    Precondition,
    /// Lost a race for a row lock after all retries. Safe to retry.
    Conflict,
    /// The store failed. Everything was rolled back.
    Internal,
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Forbidden(_)
            | Error::NotFound(_)
            | Error::InvalidTransition { .. }
            | Error::InsufficientStock { .. }
            | Error::SelfPurchase(_)
            | Error::ProductUnavailable(_)
            | Error::AccountUnavailable { .. } => ErrorKind::Precondition,
            Error::Ledger(err) => match err {
                ledger_core::Error::InsufficientBalance { .. }
                | ledger_core::Error::UserNotFound(_)
                | ledger_core::Error::ProductNotFound(_)
                | ledger_core::Error::OrderNotFound(_) => ErrorKind::Precondition,
                err if err.is_conflict() => ErrorKind::Conflict,
                _ => ErrorKind::Internal,
            },
            Error::Config(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may simply retry
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Message safe to show to end users. Store failures are not described.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Precondition => self.to_string(),
            ErrorKind::Conflict => {
                "The request conflicted with another one, please retry".to_string()
            }
            ErrorKind::Internal => "Internal error".to_string(),
        }
    }
}

impl Retryable for Error {
    fn is_conflict(&self) -> bool {
        matches!(self, Error::Ledger(err) if err.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::SelfPurchase(Uuid::nil()).kind(), ErrorKind::Precondition);
        assert_eq!(
            Error::from(ledger_core::Error::InsufficientBalance {
                user_id: Uuid::nil(),
                balance: 0,
                required: 1
            })
            .kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            Error::from(ledger_core::Error::Storage("disk".into())).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            Error::from(ledger_core::Error::Conflict("deadlock".into())).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = Error::from(ledger_core::Error::Storage("Corruption: block checksum".into()));
        assert_eq!(err.public_message(), "Internal error");

        let conflict = Error::from(ledger_core::Error::Conflict("lock timeout".into()));
        assert!(conflict.is_retryable());
        assert!(!conflict.public_message().contains("lock"));

        let transition = Error::InvalidTransition {
            order_id: Uuid::nil(),
            status: OrderStatus::Success,
            action: "cancel",
        };
        assert!(transition.public_message().contains("in status success"));
    }
}
