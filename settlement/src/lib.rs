//! Marketplace Escrow Engine
//!
//! Order/escrow state machine, settlement resolver and account moderation
//! on top of the `ledger-core` balance ledger.
//!
//! # Architecture
//!
//! Every operation opens one store transaction, locks the rows it decides
//! on (products, then orders, then users), applies order, stock and ledger
//! effects together and commits. Notifications queued during the
//! transaction are handed to the [`message_bus::Notifier`] only after
//! commit; delivery failures are logged and never undo anything.
//!
//! # Money flow of one order
//!
//! - purchase: buyer pays `total_price + govt_tax`
//! - success: seller receives `total_price - ecommerce_tax`
//! - cancel: buyer gets `total_price + govt_tax` back
//!
//! Both taxes leave the tracked system.
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Actor, Config, Marketplace, PurchaseItem};
//! use ledger_core::Role;
//! use message_bus::TracingNotifier;
//! use std::sync::Arc;
//!
//! fn main() -> settlement::Result<()> {
//!     let engine = Marketplace::open(Config::default(), Arc::new(TracingNotifier))?;
//!
//!     let buyer = engine.register_user("Ada Buyer", Role::User)?;
//!     let buyer = Actor::of(&buyer);
//!     engine.top_up(&buyer, 100_000)?;
//!
//!     # let product_id = uuid::Uuid::nil();
//!     let orders = engine.purchase(&buyer, &[PurchaseItem { product_id, quantity: 1 }])?;
//!     println!("order {} is {}", orders[0].id, orders[0].status);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod catalog;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod moderation;
pub mod orders;
pub mod queries;
pub mod resolver;
pub mod types;

// Re-exports
pub use config::{Config, TaxConfig, TaxQuote, Transport};
pub use engine::Marketplace;
pub use error::{Error, ErrorKind, Result};
pub use resolver::{ResolutionTrigger, SettlementResolver};
pub use types::*;
