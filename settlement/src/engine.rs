//! Escrow engine
//!
//! Owns the ledger, the notifier and the configuration. Every public
//! operation (in `orders`, `moderation`, `catalog`, `accounts`) runs through
//! [`Marketplace::run`]: one store transaction, notifications collected
//! inside it and delivered on a spawned task only after commit.
//!
//! Operations block on the store. Call them from `spawn_blocking` (or a
//! plain thread) when running inside an async service.

use crate::{config::Config, effects::Scope, Result};
use ledger_core::{Ledger, Metrics};
use message_bus::{metrics::record_delivery, Notification, Notifier};
use std::sync::Arc;

/// Marketplace escrow engine
pub struct Marketplace {
    /// Balance ledger and store
    ledger: Arc<Ledger>,

    /// Post-commit notification sink
    notifier: Arc<dyn Notifier>,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Marketplace {
    /// Open the store and build the engine
    pub fn open(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(Ledger::open(config.ledger.clone())?);

        tracing::info!(
            service = %config.service_name,
            data_dir = %config.ledger.data_dir.display(),
            govt_tax_rate = %config.taxes.govt_tax_rate,
            ecommerce_tax_rate = %config.taxes.ecommerce_tax_rate,
            "Marketplace engine opened"
        );

        Ok(Self {
            ledger,
            notifier,
            config,
        })
    }

    /// Balance ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Store metrics
    pub fn metrics(&self) -> &Metrics {
        self.ledger.metrics()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` in one store transaction, then deliver what it queued.
    ///
    /// `f` may run several times when the store reports a lock conflict;
    /// only the notifications of the committed attempt are delivered.
    pub(crate) fn run<T>(
        &self,
        operation: &'static str,
        mut f: impl FnMut(&mut Scope<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        let (value, outbox) = self.ledger.transact(operation, |txn| {
            let mut scope = Scope::new(&self.ledger, txn, &self.config);
            let value = f(&mut scope)?;
            Ok((value, scope.into_outbox()))
        })?;

        self.dispatch(outbox);
        Ok(value)
    }

    /// Hand notifications to the notifier without waiting for delivery
    fn dispatch(&self, outbox: Vec<Notification>) {
        if outbox.is_empty() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    count = outbox.len(),
                    "No async runtime, notifications dropped"
                );
                for notification in &outbox {
                    record_delivery(notification.kind.as_str(), "dropped");
                }
                return;
            }
        };

        let notifier = Arc::clone(&self.notifier);
        handle.spawn(async move {
            for notification in outbox {
                let user_id = notification.user_id;
                let kind = notification.kind;
                if let Err(e) = notifier.notify(notification).await {
                    record_delivery(kind.as_str(), "failed");
                    tracing::warn!(
                        user_id = %user_id,
                        kind = %kind,
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use ledger_core::{Role, User};
    use message_bus::{ChannelNotifier, NotificationKind, RecordingNotifier};
    use tempfile::TempDir;

    fn engine(notifier: Arc<dyn Notifier>) -> (Marketplace, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp_dir.path().to_path_buf();
        (Marketplace::open(config, notifier).unwrap(), temp_dir)
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notification: Notification) -> message_bus::Result<()> {
            Err(message_bus::Error::Publish("transport down".into()))
        }
    }

    #[tokio::test]
    async fn test_notifications_only_after_commit() {
        let recorder = Arc::new(RecordingNotifier::new());
        let (engine, _temp) = engine(recorder.clone());
        let user = User::new("Recipient", Role::User);

        let result: Result<()> = engine.run("failing", |scope| {
            scope.notify(user.id, NotificationKind::TopUp, "never sent", None);
            Err(Error::Validation("rejected".into()))
        });
        assert!(result.is_err());

        engine
            .run("committing", |scope| {
                scope.txn().insert_user(&user)?;
                scope.notify(user.id, NotificationKind::TopUp, "sent", None);
                Ok(())
            })
            .unwrap();

        for _ in 0..50 {
            if !recorder.delivered().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let delivered = recorder.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message, "sent");
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_the_commit() {
        let (engine, _temp) = engine(Arc::new(FailingNotifier));
        let user = User::new("Recipient", Role::User);

        engine
            .run("register", |scope| {
                scope.txn().insert_user(&user)?;
                scope.notify(user.id, NotificationKind::AccountStatus, "hello", None);
                Ok(())
            })
            .unwrap();

        tokio::task::yield_now().await;
        assert!(engine.ledger().storage().get_user(user.id).is_ok());
    }

    #[tokio::test]
    async fn test_offline_recipient_is_not_a_failure() {
        let count = |status: &str| {
            message_bus::metrics::NOTIFICATIONS_TOTAL
                .with_label_values(&["topup", status])
                .get()
        };
        let (failed, dropped) = (count("failed"), count("dropped"));
        let (engine, _temp) = engine(Arc::new(ChannelNotifier::default()));
        let user = User::new("Offline", Role::User);

        engine
            .run("register", |scope| {
                scope.txn().insert_user(&user)?;
                scope.notify(user.id, NotificationKind::TopUp, "nobody listening", None);
                Ok(())
            })
            .unwrap();

        for _ in 0..50 {
            if count("dropped") > dropped {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(count("dropped"), dropped + 1);
        assert_eq!(count("failed"), failed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp_dir.path().to_path_buf();
        config.moderation.penalty_warning_limit = 0;

        let result = Marketplace::open(config, Arc::new(RecordingNotifier::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
