//! Settlement resolver
//!
//! Force-resolves the in-flight orders of products whose seller can no
//! longer fulfil them:
//!
//! | Order status                 | Resolution                          |
//! |------------------------------|-------------------------------------|
//! | `pending`, `waiting_owner`   | cancel, refund buyer, restore stock |
//! | `waiting_users`              | settle, credit seller               |
//! | `success`, `cancel`          | untouched                           |
//!
//! Orders waiting on the buyer are paid out because the goods already
//! shipped. Restocking never republishes a product hidden by moderation
//! or deleted, since [`Product::restore_stock`](ledger_core::Product::restore_stock)
//! only undoes a sold-out demotion.

use crate::{effects::Scope, types::Resolution, Result};
use ledger_core::OrderStatus;
use std::fmt;
use uuid::Uuid;

/// What revoked the seller's ability to fulfil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTrigger {
    /// Owner suspended (directly or by penalty warnings)
    OwnerSuspended,
    /// Owner banned
    OwnerBanned,
    /// Owner deleted
    OwnerDeleted,
    /// Product deleted by its owner or an administrator
    ProductDeleted,
    /// Product moved to `admin_only`
    ProductHidden,
}

impl ResolutionTrigger {
    /// Label used in logs and audit records
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionTrigger::OwnerSuspended => "owner_suspended",
            ResolutionTrigger::OwnerBanned => "owner_banned",
            ResolutionTrigger::OwnerDeleted => "owner_deleted",
            ResolutionTrigger::ProductDeleted => "product_deleted",
            ResolutionTrigger::ProductHidden => "product_hidden",
        }
    }
}

impl fmt::Display for ResolutionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forced resolution of orders on unavailable products
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementResolver;

impl SettlementResolver {
    /// Resolve every in-flight order on `product_ids` inside the caller's
    /// transaction. Running it twice is a no-op the second time.
    pub fn resolve(
        scope: &mut Scope<'_, '_>,
        product_ids: &[Uuid],
        trigger: ResolutionTrigger,
    ) -> Result<Resolution> {
        let mut product_ids = product_ids.to_vec();
        product_ids.sort();
        product_ids.dedup();

        let mut resolution = Resolution::default();
        for product_id in product_ids {
            resolution.merge(Self::resolve_product(scope, product_id, trigger)?);
        }

        if !resolution.cancelled.is_empty() || !resolution.settled.is_empty() {
            tracing::info!(
                trigger = %trigger,
                cancelled = resolution.cancelled.len(),
                settled = resolution.settled.len(),
                untouched = resolution.untouched,
                "In-flight orders resolved"
            );
        }

        Ok(resolution)
    }

    fn resolve_product(
        scope: &mut Scope<'_, '_>,
        product_id: Uuid,
        trigger: ResolutionTrigger,
    ) -> Result<Resolution> {
        let txn = scope.txn();

        // Holding the product lock keeps new orders off it while we scan
        let mut product = txn.lock_product(product_id)?;
        let mut resolution = Resolution::default();

        for order_id in txn.order_ids_by_product(product_id)? {
            let mut order = txn.lock_order(order_id)?;

            match order.status {
                OrderStatus::Pending | OrderStatus::WaitingOwner => {
                    scope.cancel_order(&mut order, &mut product, true)?;
                    tracing::debug!(
                        order_id = %order.id,
                        trigger = %trigger,
                        "Order force-cancelled"
                    );
                    resolution.cancelled.push(order.id);
                }
                OrderStatus::WaitingUsers => {
                    scope.settle_order(&mut order)?;
                    tracing::debug!(
                        order_id = %order.id,
                        trigger = %trigger,
                        "Order force-settled"
                    );
                    resolution.settled.push(order.id);
                }
                OrderStatus::Success | OrderStatus::Cancel => resolution.untouched += 1,
            }
        }

        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_labels() {
        assert_eq!(ResolutionTrigger::OwnerBanned.to_string(), "owner_banned");
        assert_eq!(ResolutionTrigger::ProductHidden.as_str(), "product_hidden");
    }

    #[test]
    fn test_resolution_merge() {
        let mut total = Resolution::default();
        total.merge(Resolution {
            cancelled: vec![Uuid::now_v7()],
            settled: vec![],
            untouched: 2,
        });
        total.merge(Resolution {
            cancelled: vec![],
            settled: vec![Uuid::now_v7()],
            untouched: 1,
        });

        assert_eq!(total.cancelled.len(), 1);
        assert_eq!(total.settled.len(), 1);
        assert_eq!(total.untouched, 3);
    }
}
