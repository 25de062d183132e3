//! NATS notification transport

use crate::{
    message::Notification,
    metrics::{record_delivery, NOTIFICATION_PUBLISH_DURATION},
    notifier::Notifier,
    Error, Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Subject prefix; notifications go to `<prefix>.<user_id>`
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "marketplace.notifications".to_string(),
        }
    }
}

/// Publishes notifications as JSON on per-user NATS subjects.
///
/// Single attempt per notification, no retry.
#[derive(Debug, Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
    config: NatsConfig,
}

impl NatsNotifier {
    /// Connect to the server
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        info!(url = %config.url, "Connected to NATS");

        Ok(Self { client, config })
    }

    /// Subject for one notification
    pub fn subject_for(&self, notification: &Notification) -> String {
        notification.subject(&self.config.subject_prefix)
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let start = Instant::now();
        let subject = self.subject_for(&notification);
        let payload = bytes::Bytes::from(notification.to_bytes()?);

        let result = async {
            self.client
                .publish(subject.clone(), payload)
                .await
                .map_err(|e| Error::Publish(e.to_string()))?;
            self.client
                .flush()
                .await
                .map_err(|e| Error::Publish(format!("Flush failed: {}", e)))
        }
        .await;

        NOTIFICATION_PUBLISH_DURATION
            .with_label_values(&["nats"])
            .observe(start.elapsed().as_secs_f64());

        let status = if result.is_ok() { "published" } else { "error" };
        record_delivery(notification.kind.as_str(), status);

        debug!(subject = %subject, id = %notification.id, status, "Notification published");

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_config_default() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.subject_prefix, "marketplace.notifications");
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let config = NatsConfig {
            url: "nats://127.0.0.1:1".to_string(),
            ..NatsConfig::default()
        };
        let err = NatsNotifier::connect(config).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
