//! Request, response and outcome types of the escrow engine

use chrono::{DateTime, Utc};
use ledger_core::{
    ClampedDebit, EntryKind, LedgerEntry, Order, OrderStatus, Product, ReceiptStatus, Role, User,
    UserStatus, Visibility,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller identity supplied by the auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Authenticated user
    pub user_id: Uuid,

    /// Role claimed by the session
    pub role: Role,
}

impl Actor {
    /// New actor
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Actor for a stored user
    pub fn of(user: &User) -> Self {
        Self::new(user.id, user.role)
    }

    /// Administrator check
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// One line of a purchase request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    /// Product
    pub product_id: Uuid,

    /// Units (> 0)
    pub quantity: u32,
}

/// Optional review sent with a receipt confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    /// 1..=5
    pub rating: u8,

    /// At most 500 characters
    #[serde(default)]
    pub comment: String,
}

/// Buyer confirmation that the goods arrived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptConfirmation {
    /// Order
    pub order_id: Uuid,

    /// Review to attach
    #[serde(default)]
    pub review: Option<ReviewInput>,
}

impl ReceiptConfirmation {
    /// Confirmation without review
    pub fn new(order_id: Uuid) -> Self {
        Self {
            order_id,
            review: None,
        }
    }

    /// Attach a review
    pub fn with_review(mut self, rating: u8, comment: impl Into<String>) -> Self {
        self.review = Some(ReviewInput {
            rating,
            comment: comment.into(),
        });
        self
    }
}

/// Administrator status override request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOverride {
    /// Target status
    pub status: OrderStatus,

    /// Why
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of one order transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// Order after the call
    pub order: Order,

    /// False when the order already was in the target status
    pub applied: bool,
}

/// Result of an administrator override
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideOutcome {
    /// Order after the call
    pub order: Order,

    /// Status before the call
    pub previous: OrderStatus,

    /// False when the order already was in the target status
    pub applied: bool,

    /// Refunded to the buyer
    pub refunded: u64,

    /// Credited to the seller
    pub credited: u64,

    /// Debit taken back from the seller
    pub clawback: Option<ClampedDebit>,
}

/// What the settlement resolver did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Orders force-cancelled with a refund
    pub cancelled: Vec<Uuid>,

    /// Orders force-settled to the seller
    pub settled: Vec<Uuid>,

    /// Orders already terminal
    pub untouched: usize,
}

impl Resolution {
    /// Fold another resolution into this one
    pub fn merge(&mut self, other: Resolution) {
        self.cancelled.extend(other.cancelled);
        self.settled.extend(other.settled);
        self.untouched += other.untouched;
    }
}

/// Result of a moderation action
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationOutcome {
    /// User after the call
    pub user: User,

    /// False when the action was already in effect
    pub applied: bool,

    /// Products whose visibility changed
    pub products: Vec<Uuid>,

    /// Orders resolved as a consequence
    pub resolution: Resolution,
}

/// Result of a catalog change that may resolve orders
#[derive(Debug, Clone, PartialEq)]
pub struct ProductOutcome {
    /// Product after the call
    pub product: Product,

    /// False when the change was already in effect
    pub applied: bool,

    /// Orders resolved as a consequence
    pub resolution: Resolution,
}

/// New catalog item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    /// Title
    pub title: String,

    /// Unit price (> 0)
    pub price: u64,

    /// Units on hand
    pub stock: u32,

    /// `all` or `owner_admin`
    pub visibility: Visibility,
}

/// Partial product update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    /// New title
    pub title: Option<String>,

    /// New unit price
    pub price: Option<u64>,

    /// New stock level
    pub stock: Option<u32>,

    /// New visibility
    pub visibility: Option<Visibility>,
}

/// Page size when the caller does not pick one
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Order list filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFilter {
    /// Only this status
    pub status: Option<OrderStatus>,

    /// Only this buyer (seller and admin listings)
    pub buyer_id: Option<Uuid>,

    /// Only this product
    pub product_id: Option<Uuid>,

    /// Only this receipt status
    pub receipt_status: Option<ReceiptStatus>,

    /// Items to skip
    pub offset: usize,

    /// Page size
    pub limit: usize,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            status: None,
            buyer_id: None,
            product_id: None,
            receipt_status: None,
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl OrderFilter {
    /// Whether an order passes the filter
    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self.buyer_id.map_or(true, |b| order.buyer_id == b)
            && self.product_id.map_or(true, |p| order.product_id == p)
            && self
                .receipt_status
                .map_or(true, |r| order.receipt_status() == r)
    }
}

/// Ledger entry listing filter (administrators)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryFilter {
    /// Only this account
    pub user_id: Option<Uuid>,

    /// Only these kinds; empty means all
    pub kinds: Vec<EntryKind>,

    /// Items to skip
    pub offset: usize,

    /// Page size
    pub limit: usize,
}

impl Default for EntryFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            kinds: Vec::new(),
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl EntryFilter {
    /// Top-ups and withdrawals only
    pub fn top_ups_and_withdrawals() -> Self {
        Self {
            kinds: vec![EntryKind::Credit, EntryKind::Debit],
            ..Default::default()
        }
    }

    /// Whether an entry passes the filter
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.user_id.map_or(true, |u| entry.user_id == u)
            && (self.kinds.is_empty() || self.kinds.contains(&entry.kind))
    }
}

/// User listing filter (administrators)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFilter {
    /// Case-insensitive substring of the full name
    pub search: Option<String>,

    /// Only this status
    pub status: Option<UserStatus>,

    /// Only this role
    pub role: Option<Role>,

    /// Include soft-deleted accounts
    pub include_deleted: bool,

    /// Items to skip
    pub offset: usize,

    /// Page size
    pub limit: usize,
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            search: None,
            status: None,
            role: None,
            include_deleted: false,
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl UserFilter {
    /// Whether a user passes the filter
    pub fn matches(&self, user: &User) -> bool {
        let name_matches = match &self.search {
            Some(search) => user
                .full_name
                .to_lowercase()
                .contains(&search.trim().to_lowercase()),
            None => true,
        };
        name_matches
            && self.status.map_or(true, |s| user.status == s)
            && self.role.map_or(true, |r| user.role == r)
            && (self.include_deleted || user.deleted_at.is_none())
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Matching items before paging
    pub total: usize,

    /// Items skipped
    pub offset: usize,

    /// Page size
    pub limit: usize,

    /// Items
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// Cut a page out of a sorted list
    pub fn slice(items: Vec<T>, offset: usize, limit: usize) -> Self {
        let total = items.len();
        let items = items.into_iter().skip(offset).take(limit).collect();
        Self {
            total,
            offset,
            limit,
            items,
        }
    }

    /// Convert every item, keeping the paging
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            offset: self.offset,
            limit: self.limit,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

/// Order as exchanged with the API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderView {
    /// Order
    pub id: Uuid,
    /// Product
    pub product_id: Uuid,
    /// Buyer
    pub user_id: Uuid,
    /// Units
    pub quantity: u32,
    /// Pre-tax total
    pub total_price: u64,
    /// Buyer-side tax
    pub govt_tax: u64,
    /// Seller-side fee
    pub ecommerce_tax: u64,
    /// Status
    pub status: OrderStatus,
    /// Derived from status
    pub is_solved: bool,
    /// Derived from status
    pub receipt_status: ReceiptStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            product_id: order.product_id,
            user_id: order.buyer_id,
            quantity: order.quantity,
            total_price: order.total_price,
            govt_tax: order.govt_tax,
            ecommerce_tax: order.ecommerce_tax,
            status: order.status,
            is_solved: order.is_solved(),
            receipt_status: order.receipt_status(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Ledger entry as exchanged with the API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    /// Entry
    pub id: Uuid,
    /// Account
    pub user_id: Uuid,
    /// Description
    pub description: String,
    /// Signed delta
    pub amount: i64,
    /// Balance before
    pub last_balance: u64,
    /// Balance after
    pub final_balance: u64,
    /// Entry kind
    pub status: EntryKind,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for EntryView {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            description: entry.description.clone(),
            amount: entry.amount,
            last_balance: entry.last_balance,
            final_balance: entry.final_balance,
            status: entry.kind,
            created_at: entry.created_at,
        }
    }
}

/// Account as listed to administrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    /// User
    pub id: Uuid,
    /// Display name
    pub full_name: String,
    /// Role
    pub role: Role,
    /// Cached balance
    pub balance: u64,
    /// Standing
    pub status: UserStatus,
    /// End of the current ban
    pub ban_until: Option<DateTime<Utc>>,
    /// Reason for the current suspension or ban
    pub status_reason: Option<String>,
    /// Warnings since the last reset
    pub penalty_warnings: u32,
    /// Soft-delete timestamp
    pub deleted_at: Option<DateTime<Utc>>,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            role: user.role,
            balance: user.balance,
            status: user.status,
            ban_until: user.ban_until,
            status_reason: user.status_reason.clone(),
            penalty_warnings: user.penalty_warnings,
            deleted_at: user.deleted_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Balance with recent history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceStatement {
    /// Current balance
    pub balance: u64,

    /// Newest entries first
    pub entries: Vec<EntryView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: Uuid::now_v7(),
            product_id: Uuid::now_v7(),
            product_title: "Mug".to_string(),
            buyer_id: Uuid::now_v7(),
            seller_id: Uuid::now_v7(),
            quantity: 2,
            unit_price: 10_000,
            total_price: 20_000,
            govt_tax: 1_000,
            ecommerce_tax: 400,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_order_view_shape() {
        let o = order(OrderStatus::Success);
        let json = serde_json::to_value(OrderView::from(&o)).unwrap();

        assert_eq!(json["user_id"], serde_json::json!(o.buyer_id));
        assert_eq!(json["status"], "success");
        assert_eq!(json["is_solved"], true);
        assert_eq!(json["receipt_status"], "COMPLETED");
        assert_eq!(json["total_price"], 20_000);
        assert!(json.get("product_title").is_none());
    }

    #[test]
    fn test_override_request_parsing() {
        let req: StatusOverride =
            serde_json::from_str(r#"{"status":"waiting_users","reason":"courier confirmed"}"#)
                .unwrap();
        assert_eq!(req.status, OrderStatus::WaitingUsers);

        assert!(serde_json::from_str::<StatusOverride>(r#"{"status":"shipped"}"#).is_err());
    }

    #[test]
    fn test_purchase_request_parsing() {
        let items: Vec<PurchaseItem> = serde_json::from_str(
            r#"[{"product_id":"0190d7a4-0000-7000-8000-000000000001","quantity":2}]"#,
        )
        .unwrap();
        assert_eq!(items[0].quantity, 2);
    }

    #[test]
    fn test_filter_and_page() {
        let orders = vec![
            order(OrderStatus::Pending),
            order(OrderStatus::Success),
            order(OrderStatus::Pending),
        ];
        let filter = OrderFilter {
            receipt_status: Some(ReceiptStatus::PendingProcess),
            ..OrderFilter::default()
        };
        let matching: Vec<Order> = orders.into_iter().filter(|o| filter.matches(o)).collect();
        assert_eq!(matching.len(), 2);

        let page = Page::slice(matching, 1, 20);
        assert_eq!(page.total, 2);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_user_filter() {
        let mut banned = User::new("Rina Wati", Role::User);
        banned.status = UserStatus::Banned;
        let mut deleted = User::new("Rina Deleted", Role::User);
        deleted.deleted_at = Some(Utc::now());
        let admin = User::new("Site Admin", Role::Admin);

        let search = UserFilter {
            search: Some("  rina ".to_string()),
            ..Default::default()
        };
        assert!(search.matches(&banned));
        assert!(!search.matches(&deleted));
        assert!(!search.matches(&admin));

        let with_deleted = UserFilter {
            include_deleted: true,
            role: Some(Role::User),
            ..search
        };
        assert!(with_deleted.matches(&deleted));

        let by_status = UserFilter {
            status: Some(UserStatus::Banned),
            ..Default::default()
        };
        assert!(by_status.matches(&banned));
        assert!(!by_status.matches(&admin));
    }

    #[test]
    fn test_filter_defaults_from_empty_query() {
        let filter: EntryFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(filter, EntryFilter::default());
        assert_eq!(filter.limit, DEFAULT_PAGE_LIMIT);

        let logs = EntryFilter::top_ups_and_withdrawals();
        assert_eq!(logs.kinds, vec![EntryKind::Credit, EntryKind::Debit]);
    }
}
