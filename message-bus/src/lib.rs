//! Notification Emitter
//!
//! Best-effort delivery of human-readable marketplace events to users:
//! - `Notifier` trait the escrow engine calls through
//! - Per-user in-process channels (`ChannelNotifier`)
//! - NATS transport (`NatsNotifier`), one subject per user
//! - Observability via Prometheus metrics
//!
//! Delivery failures are reported to the caller, which logs and drops them.
//! Nothing here participates in the store transaction.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod channel;
pub mod error;
pub mod message;
pub mod metrics;
pub mod notifier;
pub mod publisher;
pub mod types;

pub use channel::ChannelNotifier;
pub use error::{Error, Result};
pub use message::Notification;
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier};
pub use publisher::{NatsConfig, NatsNotifier};
pub use types::NotificationKind;
