//! The interface the escrow engine emits notifications through

use crate::{message::Notification, metrics::record_delivery, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Fire-and-forget notification sink.
///
/// Implementations must not block on the caller's store transaction; the
/// engine only calls `notify` after commit.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            related_id = ?notification.related_id,
            message = %notification.message,
            "Notification"
        );
        record_delivery(notification.kind.as_str(), "logged");
        Ok(())
    }
}

/// Keeps every notification in memory, for tests and tooling
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }

    /// Notifications addressed to one user
    pub fn for_user(&self, user_id: uuid::Uuid) -> Vec<Notification> {
        self.delivered()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        record_delivery(notification.kind.as_str(), "recorded");
        self.delivered.lock().push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationKind;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_recording_notifier() {
        let recorder = Arc::new(RecordingNotifier::new());
        let sink: Arc<dyn Notifier> = recorder.clone();

        let buyer = Uuid::now_v7();
        let seller = Uuid::now_v7();
        sink.notify(Notification::new(buyer, NotificationKind::Purchase, "Bought", None))
            .await
            .unwrap();
        sink.notify(Notification::new(seller, NotificationKind::Sale, "Sold", None))
            .await
            .unwrap();

        assert_eq!(recorder.delivered().len(), 2);
        assert_eq!(recorder.for_user(seller)[0].kind, NotificationKind::Sale);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_recording_notifier_keeps_concurrent_deliveries() {
        let recorder = Arc::new(RecordingNotifier::new());
        let user = Uuid::now_v7();

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    let n = Notification::new(user, NotificationKind::TopUp, format!("#{}", i), None);
                    recorder.notify(n).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(recorder.for_user(user).len(), 64);
    }

    #[tokio::test]
    async fn test_tracing_notifier_never_fails() {
        let n = Notification::new(Uuid::now_v7(), NotificationKind::TopUp, "Top up", None);
        assert!(TracingNotifier.notify(n).await.is_ok());
    }
}
