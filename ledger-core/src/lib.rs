//! Marketplace Ledger Core
//!
//! Transactional store and append-only balance ledger for the marketplace
//! escrow engine.
//!
//! # Architecture
//!
//! - **Pessimistic Transactions**: RocksDB `TransactionDB`, row locks via `get_for_update`
//! - **Derived Cache**: `User.balance` is written together with the entry that changes it
//! - **Hash Chain**: Each user's entries are chained with SHA-256
//! - **Caller-Transparent Retry**: Lock timeouts and deadlocks re-run the whole transaction
//!
//! # Invariants
//!
//! - Non-negative balances: no committed entry leaves a balance below zero
//! - Conservation: `User.balance == Σ(entry.amount)` after every commit
//! - Append-only: entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod crypto;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result, Retryable};
pub use types::{
    AuditRecord, EntryKind, HideReason, LedgerEntry, Order, OrderStatus, Product, ReceiptStatus,
    Review, Role, User, UserStatus, Visibility, MAX_AMOUNT,
};
pub use ledger::{ClampedDebit, Ledger, LedgerAudit};
pub use storage::{Storage, StoreTxn};
pub use config::Config;
pub use metrics::Metrics;
