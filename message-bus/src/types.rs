//! Notification kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Buyer-side order events (purchase, shipment, refund)
    Purchase,
    /// Seller-side order events (new order, payout, clawback)
    Sale,
    /// Balance top-up
    #[serde(rename = "topup")]
    TopUp,
    /// Balance withdrawal
    Withdraw,
    /// Suspension, ban, reactivation, warnings
    AccountStatus,
}

impl NotificationKind {
    /// Wire name, also used as metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Purchase => "purchase",
            NotificationKind::Sale => "sale",
            NotificationKind::TopUp => "topup",
            NotificationKind::Withdraw => "withdraw",
            NotificationKind::AccountStatus => "account_status",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
