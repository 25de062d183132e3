//! Core entity types for the marketplace ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Integer money in minor currency units (no floating point)
//! - Derived state instead of duplicated flags (`OrderStatus` drives the receipt)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Caller role supplied by the identity layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Platform administrator
    Admin,
    /// Regular buyer/seller
    User,
    /// Unauthenticated visitor
    Guest,
}

/// Account standing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// May trade
    Active,
    /// Suspended by an administrator (no expiry)
    Suspended,
    /// Banned until `ban_until`
    Banned,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Banned => "banned",
        };
        f.write_str(s)
    }
}

/// Marketplace participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID (UUIDv7)
    pub id: Uuid,

    /// Display name
    pub full_name: String,

    /// Role
    pub role: Role,

    /// Cached balance, always equal to the sum of the user's ledger entries
    pub balance: u64,

    /// Account standing
    pub status: UserStatus,

    /// End of the current ban
    pub ban_until: Option<DateTime<Utc>>,

    /// Reason given for the current suspension or ban
    pub status_reason: Option<String>,

    /// Penalty warnings since the last moderation action
    pub penalty_warnings: u32,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,

    /// Sequence number of the user's latest ledger entry (0 = none)
    pub entry_seq: u64,

    /// Hash of the user's latest ledger entry (zeros = none)
    pub entry_head: [u8; 32],

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New active user with a zero balance
    pub fn new(full_name: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            full_name: full_name.into(),
            role,
            balance: 0,
            status: UserStatus::Active,
            ban_until: None,
            status_reason: None,
            penalty_warnings: 0,
            deleted_at: None,
            entry_seq: 0,
            entry_head: [0u8; 32],
            created_at: now,
            updated_at: now,
        }
    }

    /// Administrator check
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether the ban has run out at `now`
    pub fn ban_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == UserStatus::Banned && self.ban_until.map_or(false, |until| until <= now)
    }
}

/// Who may see a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Public catalog
    All,
    /// Owner and administrators
    OwnerAdmin,
    /// Administrators only
    AdminOnly,
}

impl FromStr for Visibility {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "all" => Ok(Visibility::All),
            "owner_admin" => Ok(Visibility::OwnerAdmin),
            "admin_only" => Ok(Visibility::AdminOnly),
            other => Err(crate::Error::Other(format!("Unknown visibility: {}", other))),
        }
    }
}

/// Why a product was hidden automatically. Only the path that hid a product
/// may undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HideReason {
    /// Stock reached zero
    SoldOut,
    /// Owner suspended or banned
    OwnerUnavailable,
}

/// Catalog item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product ID (UUIDv7)
    pub id: Uuid,

    /// Owning seller
    pub owner_id: Uuid,

    /// Title
    pub title: String,

    /// Unit price in minor currency units (> 0)
    pub price: u64,

    /// Units on hand
    pub stock: u32,

    /// Visibility
    pub visibility: Visibility,

    /// Automatic hide marker
    pub hidden_by: Option<HideReason>,

    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Listed in the public catalog and purchasable
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::All && self.deleted_at.is_none()
    }

    /// Remove `quantity` units, demoting the product once it sells out.
    ///
    /// Returns false without touching the product if not enough stock is left.
    pub fn take_stock(&mut self, quantity: u32) -> bool {
        if quantity == 0 || self.stock < quantity {
            return false;
        }
        self.stock -= quantity;
        if self.stock == 0 && self.visibility == Visibility::All {
            self.visibility = Visibility::OwnerAdmin;
            self.hidden_by = Some(HideReason::SoldOut);
        }
        true
    }

    /// Put `quantity` units back. Republishes the product only when it was
    /// hidden for being sold out and is otherwise live.
    pub fn restore_stock(&mut self, quantity: u32) {
        self.stock = self.stock.saturating_add(quantity);
        if self.stock > 0
            && self.deleted_at.is_none()
            && self.visibility == Visibility::OwnerAdmin
            && self.hidden_by == Some(HideReason::SoldOut)
        {
            self.visibility = Visibility::All;
            self.hidden_by = None;
        }
    }
}

/// Order lifecycle state.
///
/// `receipt_status` and `is_solved` are derived from this value and never
/// stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Paid, waiting for the seller to ship
    Pending,
    /// Waiting for the seller (set by administrators)
    WaitingOwner,
    /// Shipped, waiting for the buyer to confirm receipt
    WaitingUsers,
    /// Settled to the seller
    Success,
    /// Cancelled and refunded
    Cancel,
}

impl OrderStatus {
    /// All statuses in display order
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::WaitingOwner,
        OrderStatus::WaitingUsers,
        OrderStatus::Success,
        OrderStatus::Cancel,
    ];

    /// Receipt status derived from the order status
    pub fn receipt_status(self) -> ReceiptStatus {
        match self {
            OrderStatus::Success => ReceiptStatus::Completed,
            OrderStatus::Cancel => ReceiptStatus::Canceled,
            _ => ReceiptStatus::PendingProcess,
        }
    }

    /// Whether the order has been resolved either way
    pub fn is_solved(self) -> bool {
        self.is_terminal()
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Success | OrderStatus::Cancel)
    }

    /// Funds are held by the platform in this status
    pub fn is_escrowed(self) -> bool {
        !self.is_terminal()
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::WaitingOwner => "waiting_owner",
            OrderStatus::WaitingUsers => "waiting_users",
            OrderStatus::Success => "success",
            OrderStatus::Cancel => "cancel",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| crate::Error::Other(format!("Unknown order status: {}", s)))
    }
}

/// Receipt status exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// Order still in escrow
    PendingProcess,
    /// Order settled
    Completed,
    /// Order cancelled
    Canceled,
}

/// Largest amount of money a single price, order or ledger entry may carry.
///
/// Ledger deltas are signed, so every amount must fit in an `i64`.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

/// Purchase of one product by one buyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID (UUIDv7)
    pub id: Uuid,

    /// Purchased product
    pub product_id: Uuid,

    /// Product title at purchase time
    pub product_title: String,

    /// Buyer
    pub buyer_id: Uuid,

    /// Product owner at purchase time
    pub seller_id: Uuid,

    /// Units bought
    pub quantity: u32,

    /// Unit price at purchase time
    pub unit_price: u64,

    /// unit_price * quantity, before taxes
    pub total_price: u64,

    /// Tax paid by the buyer on top of the price
    pub govt_tax: u64,

    /// Platform fee withheld from the seller payout
    pub ecommerce_tax: u64,

    /// Lifecycle state
    pub status: OrderStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Amount debited from the buyer at purchase and refunded on cancel.
    ///
    /// Orders are only created when this stays within [`MAX_AMOUNT`].
    pub fn buyer_cost(&self) -> u64 {
        self.total_price.saturating_add(self.govt_tax)
    }

    /// Amount credited to the seller on settlement
    pub fn seller_payout(&self) -> u64 {
        self.total_price.saturating_sub(self.ecommerce_tax)
    }

    /// Derived receipt status
    pub fn receipt_status(&self) -> ReceiptStatus {
        self.status.receipt_status()
    }

    /// Derived resolution flag
    pub fn is_solved(&self) -> bool {
        self.status.is_solved()
    }
}

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Money in (top-up, sale payout)
    Credit,
    /// Money out (purchase, withdrawal, clawback)
    Debit,
    /// Money returned to a buyer
    Refund,
    /// Zero-amount marker recording a debit that could not be recovered
    Shortfall,
}

impl EntryKind {
    /// Label used in metrics and the wire format
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
            EntryKind::Refund => "refund",
            EntryKind::Shortfall => "shortfall",
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            EntryKind::Credit => 1,
            EntryKind::Debit => 2,
            EntryKind::Refund => 3,
            EntryKind::Shortfall => 4,
        }
    }
}

/// Immutable record of one balance change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (UUIDv7)
    pub id: Uuid,

    /// Account owner
    pub user_id: Uuid,

    /// Per-user sequence number, starting at 1
    pub seq: u64,

    /// Order that caused the change, if any
    pub order_id: Option<Uuid>,

    /// Human-readable description
    pub description: String,

    /// Signed delta
    pub amount: i64,

    /// Balance before
    pub last_balance: u64,

    /// Balance after
    pub final_balance: u64,

    /// Kind
    pub kind: EntryKind,

    /// Amount that could not be recovered (Shortfall entries only)
    pub shortfall: u64,

    /// Hash of the previous entry of this user
    pub prev_hash: [u8; 32],

    /// Hash of this entry
    pub hash: [u8; 32],

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Buyer review attached to a settled order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Reviewed order (one review per order)
    pub order_id: Uuid,

    /// Reviewed product
    pub product_id: Uuid,

    /// Author
    pub buyer_id: Uuid,

    /// 1..=5
    pub rating: u8,

    /// Free text, at most 500 characters
    pub comment: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Administrator action log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record ID (UUIDv7, time ordered)
    pub id: Uuid,

    /// Acting administrator
    pub admin_id: Uuid,

    /// Action name (`suspend_user`, `override_order_status`, ...)
    pub action: String,

    /// User, product or order acted upon
    pub target_id: Uuid,

    /// Free-form details
    pub details: Vec<(String, String)>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// New record stamped now
    pub fn new(admin_id: Uuid, action: impl Into<String>, target_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            admin_id,
            action: action.into(),
            target_id,
            details: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a detail
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    /// Look up a detail
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: u32) -> Product {
        Product {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            title: "Keyboard".to_string(),
            price: 50_000,
            stock,
            visibility: Visibility::All,
            hidden_by: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_receipt_derived_from_status() {
        assert_eq!(OrderStatus::Success.receipt_status(), ReceiptStatus::Completed);
        assert_eq!(OrderStatus::Cancel.receipt_status(), ReceiptStatus::Canceled);
        for status in [
            OrderStatus::Pending,
            OrderStatus::WaitingOwner,
            OrderStatus::WaitingUsers,
        ] {
            assert_eq!(status.receipt_status(), ReceiptStatus::PendingProcess);
            assert!(!status.is_solved());
        }
        assert!(OrderStatus::Success.is_solved());
        assert!(OrderStatus::Cancel.is_solved());
    }

    #[test]
    fn test_status_wire_names() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&ReceiptStatus::PendingProcess).unwrap(),
            "\"PENDING_PROCESS\""
        );
    }

    #[test]
    fn test_take_last_unit_demotes() {
        let mut p = product(1);
        assert!(p.take_stock(1));
        assert_eq!(p.stock, 0);
        assert_eq!(p.visibility, Visibility::OwnerAdmin);
        assert_eq!(p.hidden_by, Some(HideReason::SoldOut));

        p.restore_stock(1);
        assert_eq!(p.visibility, Visibility::All);
        assert_eq!(p.hidden_by, None);
    }

    #[test]
    fn test_take_stock_rejects_oversell() {
        let mut p = product(2);
        assert!(!p.take_stock(3));
        assert!(!p.take_stock(0));
        assert_eq!(p.stock, 2);
        assert_eq!(p.visibility, Visibility::All);
    }

    #[test]
    fn test_restore_keeps_manual_and_deleted_hides() {
        let mut manual = product(0);
        manual.visibility = Visibility::OwnerAdmin;
        manual.restore_stock(3);
        assert_eq!(manual.visibility, Visibility::OwnerAdmin);

        let mut deleted = product(1);
        assert!(deleted.take_stock(1));
        deleted.deleted_at = Some(Utc::now());
        deleted.restore_stock(1);
        assert_eq!(deleted.visibility, Visibility::OwnerAdmin);
    }

    #[test]
    fn test_ban_expiry() {
        let mut user = User::new("Dewi", Role::User);
        user.status = UserStatus::Banned;
        user.ban_until = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(user.ban_expired(Utc::now()));

        user.ban_until = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!user.ban_expired(Utc::now()));
    }
}
