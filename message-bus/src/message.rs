//! Notification envelope

use crate::types::NotificationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One event addressed to one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Recipient
    pub user_id: Uuid,

    /// Kind
    #[serde(rename = "type")]
    pub kind: NotificationKind,

    /// Human-readable text
    pub message: String,

    /// Order, product or user the event refers to
    pub related_id: Option<Uuid>,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Create new notification
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        message: impl Into<String>,
        related_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind,
            message: message.into(),
            related_id,
            created_at: Utc::now(),
        }
    }

    /// Per-user subject, `<prefix>.<user_id>`
    pub fn subject(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.user_id)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
