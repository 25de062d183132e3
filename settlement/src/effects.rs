//! Transaction scope and the money/stock effects shared by every transition
//!
//! A [`Scope`] lives for one attempt of one store transaction. The order
//! state machine, the settlement resolver and the moderation paths all
//! apply their effects through it so a refund or a payout is written the
//! same way whichever path triggers it.

use crate::{config::Config, types::Actor, Error, Result};
use chrono::Utc;
use ledger_core::{
    ClampedDebit, EntryKind, Ledger, LedgerEntry, Order, OrderStatus, Product, Role, StoreTxn,
    User, UserStatus,
};
use message_bus::{Notification, NotificationKind};
use uuid::Uuid;

/// One transaction attempt plus the notifications it will emit on commit
#[derive(Debug)]
pub struct Scope<'a, 'db> {
    ledger: &'a Ledger,
    txn: &'a StoreTxn<'db>,
    config: &'a Config,
    outbox: Vec<Notification>,
}

impl<'a, 'db> Scope<'a, 'db> {
    pub(crate) fn new(ledger: &'a Ledger, txn: &'a StoreTxn<'db>, config: &'a Config) -> Self {
        Self {
            ledger,
            txn,
            config,
            outbox: Vec::new(),
        }
    }

    /// Balance ledger
    pub fn ledger(&self) -> &'a Ledger {
        self.ledger
    }

    /// Underlying store transaction
    pub fn txn(&self) -> &'a StoreTxn<'db> {
        self.txn
    }

    /// Engine configuration
    pub fn config(&self) -> &'a Config {
        self.config
    }

    /// Queue a notification for delivery after commit
    pub fn notify(
        &mut self,
        user_id: Uuid,
        kind: NotificationKind,
        message: impl Into<String>,
        related_id: Option<Uuid>,
    ) {
        self.outbox
            .push(Notification::new(user_id, kind, message, related_id));
    }

    pub(crate) fn into_outbox(self) -> Vec<Notification> {
        self.outbox
    }

    /// The acting user, which must exist, not be deleted and be active
    pub fn require_active(&self, actor: &Actor) -> Result<User> {
        if actor.role == Role::Guest {
            return Err(Error::Forbidden("Guests cannot perform this action".into()));
        }
        let user = self.txn.user(actor.user_id)?;
        ensure_active(&user)?;
        if user.role != actor.role {
            return Err(Error::Forbidden(format!(
                "User {} does not hold the {:?} role",
                user.id, actor.role
            )));
        }
        Ok(user)
    }

    /// Like [`Scope::require_active`], additionally requiring an administrator
    pub fn require_admin(&self, actor: &Actor) -> Result<User> {
        if !actor.is_admin() {
            return Err(Error::Forbidden("Administrator role required".into()));
        }
        self.require_active(actor)
    }

    /// Lock an order and its product, product first
    pub fn lock_order_with_product(&self, order_id: Uuid) -> Result<(Order, Product)> {
        // product_id never changes, so an unlocked peek is enough to find it
        let product_id = self.txn.order(order_id)?.product_id;
        let product = self.txn.lock_product(product_id)?;
        let order = self.txn.lock_order(order_id)?;
        Ok((order, product))
    }

    /// Lock user rows in ascending id order
    pub fn lock_users(&self, user_ids: &[Uuid]) -> Result<()> {
        let mut ids = user_ids.to_vec();
        ids.sort();
        ids.dedup();
        for id in ids {
            self.txn.lock_user(id)?;
        }
        Ok(())
    }

    /// Debit the buyer's full cost at purchase
    pub fn charge_buyer(&mut self, order: &Order) -> Result<LedgerEntry> {
        let entry = self.ledger.apply_delta(
            self.txn,
            order.buyer_id,
            -signed(order.buyer_cost())?,
            format!(
                "Purchase '{}' x{} (incl govt tax)",
                order.product_title, order.quantity
            ),
            EntryKind::Debit,
            Some(order.id),
        )?;

        self.notify(
            order.buyer_id,
            NotificationKind::Purchase,
            format!(
                "Purchased '{}' x{} for {}",
                order.product_title,
                order.quantity,
                order.buyer_cost()
            ),
            Some(order.id),
        );
        Ok(entry)
    }

    /// Refund the buyer's full cost (price plus government tax)
    pub fn refund_buyer(&mut self, order: &Order) -> Result<LedgerEntry> {
        let entry = self.ledger.apply_delta(
            self.txn,
            order.buyer_id,
            signed(order.buyer_cost())?,
            format!(
                "Refund '{}' x{} (incl govt tax)",
                order.product_title, order.quantity
            ),
            EntryKind::Refund,
            Some(order.id),
        )?;

        self.notify(
            order.buyer_id,
            NotificationKind::Purchase,
            format!(
                "Order for '{}' was cancelled, {} refunded",
                order.product_title,
                order.buyer_cost()
            ),
            Some(order.id),
        );
        Ok(entry)
    }

    /// Pay the seller out (price minus platform fee)
    pub fn credit_seller(&mut self, order: &Order) -> Result<LedgerEntry> {
        let entry = self.ledger.apply_delta(
            self.txn,
            order.seller_id,
            signed(order.seller_payout())?,
            format!(
                "Sale '{}' x{} (excl ecommerce tax)",
                order.product_title, order.quantity
            ),
            EntryKind::Credit,
            Some(order.id),
        )?;

        self.notify(
            order.seller_id,
            NotificationKind::Sale,
            format!(
                "Order for '{}' completed, {} credited",
                order.product_title,
                order.seller_payout()
            ),
            Some(order.id),
        );
        Ok(entry)
    }

    /// Take the payout back from the seller, clamped at a zero balance
    pub fn claw_back(&mut self, order: &Order) -> Result<ClampedDebit> {
        let debit = self.ledger.apply_clamped_debit(
            self.txn,
            order.seller_id,
            order.seller_payout(),
            format!(
                "Reversal of sale '{}' x{}",
                order.product_title, order.quantity
            ),
            Some(order.id),
        )?;

        self.notify(
            order.seller_id,
            NotificationKind::Sale,
            format!(
                "Sale of '{}' was reversed, {} debited",
                order.product_title, debit.recovered
            ),
            Some(order.id),
        );
        Ok(debit)
    }

    /// Cancel effect: refund the buyer and optionally put the units back.
    ///
    /// `order` and `product` must be locked by the caller.
    pub fn cancel_order(
        &mut self,
        order: &mut Order,
        product: &mut Product,
        restock: bool,
    ) -> Result<()> {
        self.refund_buyer(order)?;

        if restock {
            product.restore_stock(order.quantity);
            product.updated_at = Utc::now();
            self.txn.put_product(product)?;
        }

        self.set_status(order, OrderStatus::Cancel)?;
        self.notify(
            order.seller_id,
            NotificationKind::Sale,
            format!("Order for '{}' was cancelled", order.product_title),
            Some(order.id),
        );
        Ok(())
    }

    /// Success effect: credit the seller. `order` must be locked by the caller.
    pub fn settle_order(&mut self, order: &mut Order) -> Result<()> {
        self.credit_seller(order)?;
        self.set_status(order, OrderStatus::Success)?;
        self.notify(
            order.buyer_id,
            NotificationKind::Purchase,
            format!("Order for '{}' is complete", order.product_title),
            Some(order.id),
        );
        Ok(())
    }

    /// Write a new status
    pub fn set_status(&self, order: &mut Order, status: OrderStatus) -> Result<()> {
        order.status = status;
        order.updated_at = Utc::now();
        self.txn.put_order(order)?;
        Ok(())
    }
}

/// Reject deleted, suspended and banned accounts
pub(crate) fn ensure_active(user: &User) -> Result<()> {
    if user.deleted_at.is_some() {
        return Err(Error::AccountUnavailable {
            user_id: user.id,
            status: "deleted".to_string(),
        });
    }
    if user.status != UserStatus::Active {
        return Err(Error::AccountUnavailable {
            user_id: user.id,
            status: user.status.to_string(),
        });
    }
    Ok(())
}

/// Money amounts are unsigned; ledger deltas are signed
pub(crate) fn signed(amount: u64) -> Result<i64> {
    i64::try_from(amount)
        .map_err(|_| Error::Validation(format!("Amount {} is out of range", amount)))
}
