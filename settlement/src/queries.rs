//! Read-side queries over committed state

use crate::{
    engine::Marketplace,
    types::{Actor, EntryFilter, EntryView, OrderFilter, OrderView, Page, UserFilter, UserView},
    Error, Result,
};
use chrono::{Duration, Utc};
use ledger_core::{AuditRecord, Order, OrderStatus, Product, Review, Role, User, Visibility};
use std::cmp::Reverse;
use uuid::Uuid;

/// Cancelled orders older than this drop out of the buyer's order list
pub const CANCELLED_RETENTION_DAYS: i64 = 30;

impl Marketplace {
    /// One order, visible to its buyer, its seller and administrators
    pub fn order(&self, actor: &Actor, order_id: Uuid) -> Result<Order> {
        let user = self.check_reader(actor)?;
        let order = self.ledger().storage().get_order(order_id)?;

        if !user.is_admin() && order.buyer_id != user.id && order.seller_id != user.id {
            return Err(Error::NotFound(format!("Order {}", order_id)));
        }
        Ok(order)
    }

    /// The caller's purchases: in-flight first, newest first within a status
    pub fn buyer_orders(&self, actor: &Actor, filter: &OrderFilter) -> Result<Page<OrderView>> {
        let user = self.check_reader(actor)?;
        let storage = self.ledger().storage();
        let cutoff = Utc::now() - Duration::days(CANCELLED_RETENTION_DAYS);

        let mut orders = Vec::new();
        for order_id in storage.order_ids_by_buyer(user.id)? {
            let order = storage.get_order(order_id)?;
            if order.status == OrderStatus::Cancel && order.created_at < cutoff {
                continue;
            }
            if filter.matches(&order) {
                orders.push(order);
            }
        }

        orders.sort_by_key(|o| (o.status, Reverse(o.created_at)));
        Ok(order_page(orders, filter))
    }

    /// Orders on the caller's products, newest first
    pub fn seller_orders(&self, actor: &Actor, filter: &OrderFilter) -> Result<Page<OrderView>> {
        let user = self.check_reader(actor)?;
        let storage = self.ledger().storage();

        let mut orders = Vec::new();
        for order_id in storage.order_ids_by_seller(user.id)? {
            let order = storage.get_order(order_id)?;
            if filter.matches(&order) {
                orders.push(order);
            }
        }

        orders.sort_by_key(|o| Reverse(o.created_at));
        Ok(order_page(orders, filter))
    }

    /// Every order in the marketplace, newest first (administrators)
    pub fn admin_orders(&self, admin: &Actor, filter: &OrderFilter) -> Result<Page<OrderView>> {
        self.require_admin_reader(admin)?;

        let mut orders: Vec<Order> = self
            .ledger()
            .storage()
            .orders()?
            .into_iter()
            .filter(|order| filter.matches(order))
            .collect();

        orders.sort_by_key(|o| Reverse(o.created_at));
        Ok(order_page(orders, filter))
    }

    /// Ledger entries of any account, newest first (administrators)
    pub fn admin_entries(&self, admin: &Actor, filter: &EntryFilter) -> Result<Page<EntryView>> {
        self.require_admin_reader(admin)?;
        let storage = self.ledger().storage();

        let mut entries = match filter.user_id {
            Some(user_id) => storage.all_entries(user_id)?,
            None => storage.ledger_entries()?,
        };
        entries.retain(|entry| filter.matches(entry));
        entries.sort_by_key(|e| Reverse((e.created_at, e.seq)));

        Ok(Page::slice(entries, filter.offset, filter.limit).map(|e| EntryView::from(&e)))
    }

    /// Registered accounts, newest first (administrators)
    pub fn users(&self, admin: &Actor, filter: &UserFilter) -> Result<Page<UserView>> {
        self.require_admin_reader(admin)?;

        let mut users: Vec<User> = self
            .ledger()
            .storage()
            .users()?
            .into_iter()
            .filter(|user| filter.matches(user))
            .collect();
        users.sort_by_key(|u| Reverse(u.created_at));

        Ok(Page::slice(users, filter.offset, filter.limit).map(|u| UserView::from(&u)))
    }

    /// A product as seen by the caller.
    ///
    /// Public products are visible to everyone, `owner_admin` ones to the
    /// owner, `admin_only` and deleted ones to administrators only.
    pub fn product(&self, actor: &Actor, product_id: Uuid) -> Result<Product> {
        let product = self.ledger().storage().get_product(product_id)?;
        if product.is_public() {
            return Ok(product);
        }

        let visible = if actor.role == Role::Guest {
            false
        } else {
            let user = self.check_reader(actor)?;
            user.is_admin()
                || (product.owner_id == user.id
                    && product.deleted_at.is_none()
                    && product.visibility == Visibility::OwnerAdmin)
        };

        if !visible {
            return Err(Error::NotFound(format!("Product {}", product_id)));
        }
        Ok(product)
    }

    /// Products of one owner that the caller may see
    pub fn products_by_owner(&self, actor: &Actor, owner_id: Uuid) -> Result<Vec<Product>> {
        let storage = self.ledger().storage();
        let mut products = Vec::new();
        for product_id in storage.product_ids_by_owner(owner_id)? {
            match self.product(actor, product_id) {
                Ok(product) => products.push(product),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(products)
    }

    /// Review attached to an order
    pub fn review(&self, order_id: Uuid) -> Result<Option<Review>> {
        Ok(self.ledger().storage().get_review(order_id)?)
    }

    /// Administrator action log, newest first
    pub fn audit_log(&self, admin: &Actor, limit: usize) -> Result<Vec<AuditRecord>> {
        self.require_admin_reader(admin)?;
        Ok(self.ledger().storage().audit_records(limit)?)
    }

    /// Caller account for read access
    fn check_reader(&self, actor: &Actor) -> Result<User> {
        if actor.role == Role::Guest {
            return Err(Error::Forbidden("Sign in to see this".into()));
        }
        self.check_account(actor.user_id)
    }

    /// Caller account, which must be an active administrator
    pub(crate) fn require_admin_reader(&self, actor: &Actor) -> Result<User> {
        if !actor.is_admin() {
            return Err(Error::Forbidden("Administrator role required".into()));
        }
        let user = self.check_account(actor.user_id)?;
        if !user.is_admin() {
            return Err(Error::Forbidden("Administrator role required".into()));
        }
        Ok(user)
    }
}

fn order_page(orders: Vec<Order>, filter: &OrderFilter) -> Page<OrderView> {
    Page::slice(orders, filter.offset, filter.limit).map(|o| OrderView::from(&o))
}
