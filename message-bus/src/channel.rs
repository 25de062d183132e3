//! In-process per-user delivery
//!
//! Each connected client subscribes to its own broadcast channel. Channels
//! are owned by the `ChannelNotifier` instance that is injected into the
//! engine, so there is no process-wide registry.

use crate::{message::Notification, metrics::record_delivery, notifier::Notifier, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default per-user buffer; slow receivers lose the oldest notifications
const DEFAULT_CAPACITY: usize = 64;

/// Per-user broadcast channels
#[derive(Debug)]
pub struct ChannelNotifier {
    channels: DashMap<Uuid, broadcast::Sender<Notification>>,
    capacity: usize,
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChannelNotifier {
    /// Create with a per-user buffer size
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to one user's notifications
    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Users with a live channel
    pub fn connected_users(&self) -> usize {
        self.channels.len()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let user_id = notification.user_id;
        let kind = notification.kind;

        let sent = match self.channels.get(&user_id) {
            Some(sender) => sender.send(notification).is_ok(),
            None => false,
        };

        if sent {
            record_delivery(kind.as_str(), "delivered");
        } else {
            // Offline users miss the notification; forget a channel nobody reads
            self.channels
                .remove_if(&user_id, |_, sender| sender.receiver_count() == 0);
            record_delivery(kind.as_str(), "dropped");
            tracing::debug!(user_id = %user_id, kind = %kind, "No subscriber, notification dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationKind;

    #[tokio::test]
    async fn test_delivers_only_to_recipient() {
        let notifier = ChannelNotifier::default();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        let mut alice_rx = notifier.subscribe(alice);
        let mut bob_rx = notifier.subscribe(bob);

        notifier
            .notify(Notification::new(alice, NotificationKind::Purchase, "Order placed", None))
            .await
            .unwrap();

        let received = alice_rx.recv().await.unwrap();
        assert_eq!(received.message, "Order placed");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribed_user_is_dropped() {
        let dropped = || {
            crate::metrics::NOTIFICATIONS_TOTAL
                .with_label_values(&["sale", "dropped"])
                .get()
        };
        let before = dropped();
        let notifier = ChannelNotifier::default();
        let user = Uuid::now_v7();

        // Dropping is not a delivery failure
        notifier
            .notify(Notification::new(user, NotificationKind::Sale, "Sold", None))
            .await
            .unwrap();

        let rx = notifier.subscribe(user);
        drop(rx);
        notifier
            .notify(Notification::new(user, NotificationKind::Sale, "Sold", None))
            .await
            .unwrap();
        assert_eq!(notifier.connected_users(), 0);
        assert_eq!(dropped(), before + 2);
    }
}
