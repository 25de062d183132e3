//! Order state machine
//!
//! ```text
//!   purchase
//!      |
//!      v
//!   pending ----(seller ships)----> waiting_users ----(buyer confirms)----> success
//!      |                                                                      |
//!      +--(buyer/seller cancel)--> cancel <----------(admin override)---------+
//!   waiting_owner --(buyer/seller cancel)--^
//! ```
//!
//! Batch operations run in one store transaction: either every order in
//! the batch transitions or none does. Repeating a transition on an order
//! that already reached its target status is reported with
//! `applied == false` instead of an error.

use crate::{
    engine::Marketplace,
    types::{
        Actor, OverrideOutcome, PurchaseItem, ReceiptConfirmation, StatusOverride,
        TransitionOutcome,
    },
    Error, Result,
};
use chrono::Utc;
use ledger_core::{AuditRecord, Order, OrderStatus, Product, Review, Role, MAX_AMOUNT};
use message_bus::NotificationKind;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Longest review comment, in characters
pub const MAX_REVIEW_COMMENT: usize = 500;

/// Longest override reason, in characters
pub const MAX_OVERRIDE_REASON: usize = 255;

impl Marketplace {
    /// Buy one or more products.
    ///
    /// Each item becomes one `pending` order. Stock is taken, the buyer is
    /// debited `total_price + govt_tax` and a product that sells out is
    /// hidden from the public catalog.
    pub fn purchase(&self, actor: &Actor, items: &[PurchaseItem]) -> Result<Vec<Order>> {
        if actor.role == Role::Guest {
            return Err(Error::Forbidden("Guests cannot purchase".into()));
        }
        if items.is_empty() {
            return Err(Error::Validation("Purchase list must not be empty".into()));
        }
        if let Some(item) = items.iter().find(|item| item.quantity == 0) {
            return Err(Error::Validation(format!(
                "Quantity for product {} must be positive",
                item.product_id
            )));
        }
        self.check_account(actor.user_id)?;

        let orders = self.run("purchase", |scope| {
            let buyer = scope.require_active(actor)?;
            let txn = scope.txn();

            // Products first, in id order
            let product_ids: BTreeSet<Uuid> = items.iter().map(|item| item.product_id).collect();
            let mut products: BTreeMap<Uuid, Product> = BTreeMap::new();
            for product_id in product_ids {
                products.insert(product_id, txn.lock_product(product_id)?);
            }

            let mut orders = Vec::with_capacity(items.len());
            for item in items {
                let product = products
                    .get_mut(&item.product_id)
                    .ok_or(Error::ProductUnavailable(item.product_id))?;

                if !product.is_public() {
                    return Err(Error::ProductUnavailable(product.id));
                }
                if product.owner_id == buyer.id {
                    return Err(Error::SelfPurchase(product.id));
                }

                let out_of_range = || {
                    Error::Validation(format!(
                        "Order total for product {} exceeds {}",
                        item.product_id, MAX_AMOUNT
                    ))
                };
                let total_price = product
                    .price
                    .checked_mul(u64::from(item.quantity))
                    .filter(|total| *total <= MAX_AMOUNT)
                    .ok_or_else(out_of_range)?;
                let taxes = scope.config().taxes.quote(total_price)?;
                if total_price
                    .checked_add(taxes.govt_tax)
                    .map_or(true, |cost| cost > MAX_AMOUNT)
                {
                    return Err(out_of_range());
                }

                let available = product.stock;
                if !product.take_stock(item.quantity) {
                    return Err(Error::InsufficientStock {
                        product_id: product.id,
                        available,
                        requested: item.quantity,
                    });
                }

                let now = Utc::now();
                product.updated_at = now;
                let order = Order {
                    id: Uuid::now_v7(),
                    product_id: product.id,
                    product_title: product.title.clone(),
                    buyer_id: buyer.id,
                    seller_id: product.owner_id,
                    quantity: item.quantity,
                    unit_price: product.price,
                    total_price,
                    govt_tax: taxes.govt_tax,
                    ecommerce_tax: taxes.ecommerce_tax,
                    status: OrderStatus::Pending,
                    created_at: now,
                    updated_at: now,
                };

                txn.put_product(product)?;
                scope.charge_buyer(&order)?;
                txn.insert_order(&order)?;

                scope.notify(
                    order.seller_id,
                    NotificationKind::Sale,
                    format!(
                        "New order for '{}' x{}, please confirm shipment",
                        order.product_title, order.quantity
                    ),
                    Some(order.id),
                );
                orders.push(order);
            }

            Ok(orders)
        })?;

        for order in &orders {
            tracing::info!(
                order_id = %order.id,
                product_id = %order.product_id,
                buyer_id = %order.buyer_id,
                quantity = order.quantity,
                total_price = order.total_price,
                govt_tax = order.govt_tax,
                "Order placed"
            );
        }
        Ok(orders)
    }

    /// Seller confirms shipment: `pending -> waiting_users`
    pub fn confirm_shipment(
        &self,
        actor: &Actor,
        order_ids: &[Uuid],
    ) -> Result<Vec<TransitionOutcome>> {
        require_ids(order_ids)?;
        self.check_account(actor.user_id)?;

        let outcomes = self.run("confirm_shipment", |scope| {
            scope.require_active(actor)?;

            let mut outcomes = Vec::with_capacity(order_ids.len());
            for order_id in order_ids {
                let (mut order, product) = scope.lock_order_with_product(*order_id)?;
                if product.owner_id != actor.user_id {
                    return Err(Error::Forbidden(format!(
                        "Only the seller can ship order {}",
                        order.id
                    )));
                }

                let applied = match order.status {
                    OrderStatus::Pending => {
                        scope.set_status(&mut order, OrderStatus::WaitingUsers)?;
                        scope.notify(
                            order.buyer_id,
                            NotificationKind::Purchase,
                            format!(
                                "'{}' has been shipped, please confirm receipt once it arrives",
                                order.product_title
                            ),
                            Some(order.id),
                        );
                        true
                    }
                    OrderStatus::WaitingUsers => false,
                    status => {
                        return Err(Error::InvalidTransition {
                            order_id: order.id,
                            status,
                            action: "confirm shipment of",
                        })
                    }
                };
                outcomes.push(TransitionOutcome { order, applied });
            }
            Ok(outcomes)
        })?;

        log_outcomes("Shipment confirmed", &outcomes);
        Ok(outcomes)
    }

    /// Buyer confirms receipt: `waiting_users -> success`, seller paid out
    pub fn confirm_receipt(
        &self,
        actor: &Actor,
        confirmations: &[ReceiptConfirmation],
    ) -> Result<Vec<TransitionOutcome>> {
        if confirmations.is_empty() {
            return Err(Error::Validation("Order list must not be empty".into()));
        }
        for confirmation in confirmations {
            if let Some(review) = &confirmation.review {
                if !(1..=5).contains(&review.rating) {
                    return Err(Error::Validation(format!(
                        "Rating must be between 1 and 5, got {}",
                        review.rating
                    )));
                }
                if review.comment.chars().count() > MAX_REVIEW_COMMENT {
                    return Err(Error::Validation(format!(
                        "Review comment must be at most {} characters",
                        MAX_REVIEW_COMMENT
                    )));
                }
            }
        }
        self.check_account(actor.user_id)?;

        let outcomes = self.run("confirm_receipt", |scope| {
            scope.require_active(actor)?;
            let txn = scope.txn();

            let mut outcomes = Vec::with_capacity(confirmations.len());
            for confirmation in confirmations {
                let (mut order, _product) =
                    scope.lock_order_with_product(confirmation.order_id)?;
                if order.buyer_id != actor.user_id {
                    return Err(Error::Forbidden(format!(
                        "Only the buyer can confirm receipt of order {}",
                        order.id
                    )));
                }

                let applied = match order.status {
                    OrderStatus::WaitingUsers => {
                        scope.settle_order(&mut order)?;

                        if let Some(input) = &confirmation.review {
                            if txn.has_review(order.id)? {
                                return Err(Error::Validation(format!(
                                    "Order {} has already been reviewed",
                                    order.id
                                )));
                            }
                            txn.put_review(&Review {
                                order_id: order.id,
                                product_id: order.product_id,
                                buyer_id: order.buyer_id,
                                rating: input.rating,
                                comment: input.comment.clone(),
                                created_at: Utc::now(),
                            })?;
                        }
                        true
                    }
                    OrderStatus::Success => false,
                    status => {
                        return Err(Error::InvalidTransition {
                            order_id: order.id,
                            status,
                            action: "confirm receipt of",
                        })
                    }
                };
                outcomes.push(TransitionOutcome { order, applied });
            }
            Ok(outcomes)
        })?;

        log_outcomes("Receipt confirmed", &outcomes);
        Ok(outcomes)
    }

    /// Buyer or seller cancels: `pending | waiting_owner -> cancel`
    pub fn cancel(&self, actor: &Actor, order_ids: &[Uuid]) -> Result<Vec<TransitionOutcome>> {
        require_ids(order_ids)?;
        self.check_account(actor.user_id)?;

        let outcomes = self.run("cancel", |scope| {
            scope.require_active(actor)?;

            let mut outcomes = Vec::with_capacity(order_ids.len());
            for order_id in order_ids {
                let (mut order, mut product) = scope.lock_order_with_product(*order_id)?;
                if order.buyer_id != actor.user_id && product.owner_id != actor.user_id {
                    return Err(Error::Forbidden(format!(
                        "Only the buyer or the seller can cancel order {}",
                        order.id
                    )));
                }

                let applied = match order.status {
                    OrderStatus::Pending | OrderStatus::WaitingOwner => {
                        scope.cancel_order(&mut order, &mut product, true)?;
                        true
                    }
                    OrderStatus::Cancel => false,
                    status => {
                        return Err(Error::InvalidTransition {
                            order_id: order.id,
                            status,
                            action: "cancel",
                        })
                    }
                };
                outcomes.push(TransitionOutcome { order, applied });
            }
            Ok(outcomes)
        })?;

        log_outcomes("Order cancelled", &outcomes);
        Ok(outcomes)
    }

    /// Administrator forces an order into a status.
    ///
    /// * into `success`: the seller is credited once.
    /// * into `cancel` from `pending`/`waiting_owner`: refund and restock.
    /// * into `cancel` from `waiting_users`/`success`: refund, and the payout
    ///   is debited back from the seller, clamped at a zero balance. The
    ///   unrecovered part is recorded as a shortfall entry.
    /// * into another non-terminal status: status only.
    ///
    /// `cancel` is final, and `success` may only be overridden to `cancel`.
    pub fn override_status(
        &self,
        admin: &Actor,
        order_id: Uuid,
        request: &StatusOverride,
    ) -> Result<OverrideOutcome> {
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if reason.map_or(false, |r| r.chars().count() > MAX_OVERRIDE_REASON) {
            return Err(Error::Validation(format!(
                "Reason must be at most {} characters",
                MAX_OVERRIDE_REASON
            )));
        }
        let target = request.status;
        self.check_account(admin.user_id)?;

        let outcome = self.run("override_status", |scope| {
            scope.require_admin(admin)?;
            let (mut order, mut product) = scope.lock_order_with_product(order_id)?;
            let previous = order.status;

            let mut outcome = OverrideOutcome {
                order: order.clone(),
                previous,
                applied: false,
                refunded: 0,
                credited: 0,
                clawback: None,
            };
            if previous == target {
                return Ok(outcome);
            }
            if previous == OrderStatus::Cancel
                || (previous == OrderStatus::Success && target != OrderStatus::Cancel)
            {
                return Err(Error::InvalidTransition {
                    order_id,
                    status: previous,
                    action: "override",
                });
            }

            scope.lock_users(&[order.buyer_id, order.seller_id])?;
            match (previous, target) {
                (_, OrderStatus::Success) => {
                    scope.settle_order(&mut order)?;
                    outcome.credited = order.seller_payout();
                }
                (OrderStatus::Pending | OrderStatus::WaitingOwner, OrderStatus::Cancel) => {
                    scope.cancel_order(&mut order, &mut product, true)?;
                    outcome.refunded = order.buyer_cost();
                }
                (_, OrderStatus::Cancel) => {
                    // Goods already shipped: no restock
                    scope.cancel_order(&mut order, &mut product, false)?;
                    outcome.refunded = order.buyer_cost();
                    outcome.clawback = Some(scope.claw_back(&order)?);
                }
                (_, status) => {
                    scope.set_status(&mut order, status)?;
                    let message = format!(
                        "An administrator moved your order for '{}' to {}",
                        order.product_title, status
                    );
                    scope.notify(
                        order.buyer_id,
                        NotificationKind::Purchase,
                        message.clone(),
                        Some(order.id),
                    );
                    scope.notify(order.seller_id, NotificationKind::Sale, message, Some(order.id));
                }
            }

            let mut record = AuditRecord::new(admin.user_id, "override_order_status", order.id)
                .with("from", previous)
                .with("to", target)
                .with("reason", reason.unwrap_or(""))
                .with("refunded", outcome.refunded)
                .with("credited", outcome.credited);
            if let Some(clawback) = &outcome.clawback {
                record = record
                    .with("recovered", clawback.recovered)
                    .with("shortfall", clawback.shortfall);
            }
            scope.txn().append_audit(&record)?;

            outcome.order = order;
            outcome.applied = true;
            Ok(outcome)
        })?;

        if outcome.applied {
            tracing::info!(
                order_id = %order_id,
                admin_id = %admin.user_id,
                from = %outcome.previous,
                to = %target,
                refunded = outcome.refunded,
                credited = outcome.credited,
                shortfall = outcome.clawback.as_ref().map_or(0, |c| c.shortfall),
                "Order status overridden"
            );
        }
        Ok(outcome)
    }
}

fn require_ids(order_ids: &[Uuid]) -> Result<()> {
    if order_ids.is_empty() {
        return Err(Error::Validation("Order list must not be empty".into()));
    }
    Ok(())
}

fn log_outcomes(message: &'static str, outcomes: &[TransitionOutcome]) {
    for outcome in outcomes.iter().filter(|o| o.applied) {
        tracing::info!(
            order_id = %outcome.order.id,
            status = %outcome.order.status,
            "{}",
            message
        );
    }
}
