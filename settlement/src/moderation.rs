//! Account moderation
//!
//! Suspending, banning or deleting a seller takes every live product of
//! theirs offline (soft delete, `owner_admin`, marked `OwnerUnavailable`)
//! and runs the settlement resolver over them in the same transaction.
//! Reactivation is the only path that brings those products back.

use crate::{
    effects::{ensure_active, Scope},
    engine::Marketplace,
    resolver::{ResolutionTrigger, SettlementResolver},
    types::{Actor, ModerationOutcome, Resolution},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use ledger_core::{AuditRecord, HideReason, User, UserStatus, Visibility};
use message_bus::NotificationKind;
use uuid::Uuid;

/// Actor recorded for automatic actions (ban expiry, warning limit)
pub const SYSTEM_ACTOR: Uuid = Uuid::nil();

/// Shortest moderation reason, in characters
pub const MIN_REASON: usize = 10;

/// Longest moderation reason, in characters
pub const MAX_REASON: usize = 255;

/// How an account is taken offline
#[derive(Debug, Clone)]
enum Offline {
    Suspend { reason: String },
    Ban { until: DateTime<Utc>, reason: String },
    Delete,
}

impl Offline {
    fn action(&self) -> &'static str {
        match self {
            Offline::Suspend { .. } => "suspend_user",
            Offline::Ban { .. } => "ban_user",
            Offline::Delete => "delete_user",
        }
    }

    fn trigger(&self) -> ResolutionTrigger {
        match self {
            Offline::Suspend { .. } => ResolutionTrigger::OwnerSuspended,
            Offline::Ban { .. } => ResolutionTrigger::OwnerBanned,
            Offline::Delete => ResolutionTrigger::OwnerDeleted,
        }
    }

    /// Whether the user is already in the state this action produces
    /// (a deleted user is offline for good)
    fn in_effect(&self, user: &User) -> bool {
        if user.deleted_at.is_some() {
            return true;
        }
        match self {
            Offline::Suspend { .. } => user.status == UserStatus::Suspended,
            Offline::Ban { .. } => user.status == UserStatus::Banned,
            Offline::Delete => false,
        }
    }
}

impl Marketplace {
    /// Suspend a user indefinitely
    pub fn suspend_user(
        &self,
        admin: &Actor,
        user_id: Uuid,
        reason: &str,
    ) -> Result<ModerationOutcome> {
        let reason = validate_reason(reason)?;
        self.moderate(admin, user_id, Offline::Suspend { reason })
    }

    /// Ban a user for `hours` hours
    pub fn ban_user(
        &self,
        admin: &Actor,
        user_id: Uuid,
        hours: u32,
        reason: &str,
    ) -> Result<ModerationOutcome> {
        let reason = validate_reason(reason)?;
        let max_hours = self.config().moderation.max_ban_hours;
        if hours == 0 || hours > max_hours {
            return Err(Error::Validation(format!(
                "Ban duration must be between 1 and {} hours",
                max_hours
            )));
        }
        let until = Utc::now() + Duration::hours(i64::from(hours));
        self.moderate(admin, user_id, Offline::Ban { until, reason })
    }

    /// Soft-delete a user
    pub fn delete_user(&self, admin: &Actor, user_id: Uuid) -> Result<ModerationOutcome> {
        if admin.user_id == user_id {
            return Err(Error::Forbidden(
                "Administrators cannot delete their own account".into(),
            ));
        }
        self.moderate(admin, user_id, Offline::Delete)
    }

    /// Lift a suspension or ban
    pub fn reactivate_user(&self, admin: &Actor, user_id: Uuid) -> Result<ModerationOutcome> {
        self.check_account(admin.user_id)?;

        let outcome = self.run("reactivate_user", |scope| {
            scope.require_admin(admin)?;
            reactivate(scope, admin.user_id, user_id, "reactivate_user")
        })?;

        if outcome.applied {
            tracing::info!(
                user_id = %user_id,
                admin_id = %admin.user_id,
                products = outcome.products.len(),
                "User reactivated"
            );
        }
        Ok(outcome)
    }

    /// Record a penalty warning. Reaching the configured limit suspends the
    /// user through the regular suspension path.
    pub fn issue_penalty_warning(
        &self,
        admin: &Actor,
        user_id: Uuid,
        reason: &str,
    ) -> Result<ModerationOutcome> {
        let reason = validate_reason(reason)?;
        self.check_account(admin.user_id)?;
        let limit = self.config().moderation.penalty_warning_limit;

        let outcome = self.run("issue_penalty_warning", |scope| {
            scope.require_admin(admin)?;
            let txn = scope.txn();

            let target = txn.user(user_id)?;
            if target.is_admin() {
                return Err(Error::Forbidden("Administrators cannot receive warnings".into()));
            }
            ensure_active(&target)?;

            txn.append_audit(
                &AuditRecord::new(admin.user_id, "penalty_warning", user_id)
                    .with("reason", &reason)
                    .with("warnings", target.penalty_warnings + 1),
            )?;

            if target.penalty_warnings + 1 >= limit {
                let reason = format!(
                    "Automatically suspended after reaching {} penalty warnings",
                    limit
                );
                return take_offline(scope, SYSTEM_ACTOR, user_id, &Offline::Suspend { reason });
            }

            let mut user = txn.lock_user(user_id)?;
            user.penalty_warnings += 1;
            user.updated_at = Utc::now();
            txn.put_user(&user)?;

            scope.notify(
                user_id,
                NotificationKind::AccountStatus,
                format!(
                    "You received a penalty warning ({}/{}): {}",
                    user.penalty_warnings, limit, reason
                ),
                Some(user_id),
            );
            Ok(ModerationOutcome {
                user,
                applied: true,
                products: Vec::new(),
                resolution: Resolution::default(),
            })
        })?;

        tracing::info!(
            user_id = %user_id,
            admin_id = %admin.user_id,
            warnings = outcome.user.penalty_warnings,
            status = %outcome.user.status,
            "Penalty warning issued"
        );
        Ok(outcome)
    }

    /// Account standing gate run before every mutating operation.
    ///
    /// Lifts a ban that has run out and enforces the warning limit, then
    /// rejects deleted, suspended and banned accounts.
    pub fn check_account(&self, user_id: Uuid) -> Result<User> {
        let limit = self.config().moderation.penalty_warning_limit;

        let user = self.run("check_account", |scope| {
            let user = scope.txn().user(user_id)?;

            if user.deleted_at.is_none() && user.ban_expired(Utc::now()) {
                return Ok(reactivate(scope, SYSTEM_ACTOR, user_id, "lift_expired_ban")?.user);
            }

            if user.deleted_at.is_none()
                && user.status == UserStatus::Active
                && !user.is_admin()
                && user.penalty_warnings >= limit
            {
                let reason = format!(
                    "Automatically suspended after reaching {} penalty warnings",
                    limit
                );
                return Ok(
                    take_offline(scope, SYSTEM_ACTOR, user_id, &Offline::Suspend { reason })?
                        .user,
                );
            }

            Ok(user)
        })?;

        ensure_active(&user)?;
        Ok(user)
    }

    /// Reactivate every banned user whose ban ended before `now`.
    ///
    /// Each user is handled in its own transaction; failures are logged and
    /// the sweep continues.
    pub fn sweep_expired_bans(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let storage = self.ledger().storage();
        let mut lifted = Vec::new();

        for user_id in storage.banned_user_ids()? {
            let user = storage.get_user(user_id)?;
            if user.deleted_at.is_some() || !user.ban_expired(now) {
                continue;
            }

            let result = self.run("lift_expired_ban", |scope| {
                // Re-check under the transaction, the ban may have changed
                let current = scope.txn().user(user_id)?;
                if !current.ban_expired(now) {
                    return Ok(false);
                }
                Ok(reactivate(scope, SYSTEM_ACTOR, user_id, "lift_expired_ban")?.applied)
            });

            match result {
                Ok(true) => lifted.push(user_id),
                Ok(false) => {}
                Err(e) => tracing::warn!(user_id = %user_id, error = %e, "Failed to lift ban"),
            }
        }

        if !lifted.is_empty() {
            tracing::info!(count = lifted.len(), "Expired bans lifted");
        }
        Ok(lifted)
    }

    fn moderate(&self, admin: &Actor, user_id: Uuid, action: Offline) -> Result<ModerationOutcome> {
        self.check_account(admin.user_id)?;

        let outcome = self.run(action.action(), |scope| {
            scope.require_admin(admin)?;
            take_offline(scope, admin.user_id, user_id, &action)
        })?;

        if outcome.applied {
            tracing::info!(
                user_id = %user_id,
                admin_id = %admin.user_id,
                action = action.action(),
                products = outcome.products.len(),
                cancelled = outcome.resolution.cancelled.len(),
                settled = outcome.resolution.settled.len(),
                "User taken offline"
            );
        }
        Ok(outcome)
    }
}

/// Hide the user's products, resolve their orders, then update the user.
///
/// Locks products, then orders, then users.
fn take_offline(
    scope: &mut Scope<'_, '_>,
    actor_id: Uuid,
    user_id: Uuid,
    action: &Offline,
) -> Result<ModerationOutcome> {
    let txn = scope.txn();
    let target = txn.user(user_id)?;

    if target.is_admin() && !matches!(action, Offline::Delete) {
        return Err(Error::Forbidden(format!(
            "Administrator accounts cannot be {}",
            match action {
                Offline::Ban { .. } => "banned",
                _ => "suspended",
            }
        )));
    }
    if action.in_effect(&target) {
        return Ok(ModerationOutcome {
            user: target,
            applied: false,
            products: Vec::new(),
            resolution: Resolution::default(),
        });
    }

    let now = Utc::now();
    let mut product_ids = txn.product_ids_by_owner(user_id)?;
    product_ids.sort();

    let mut hidden = Vec::new();
    for product_id in &product_ids {
        let mut product = txn.lock_product(*product_id)?;
        // Deleted and admin-hidden products stay as they are
        if product.deleted_at.is_some() || product.visibility == Visibility::AdminOnly {
            continue;
        }
        product.deleted_at = Some(now);
        product.visibility = Visibility::OwnerAdmin;
        product.hidden_by = Some(HideReason::OwnerUnavailable);
        product.updated_at = now;
        txn.put_product(&product)?;
        hidden.push(product.id);
    }

    let resolution = SettlementResolver::resolve(scope, &product_ids, action.trigger())?;

    let mut user = txn.lock_user(user_id)?;
    let mut record = AuditRecord::new(actor_id, action.action(), user_id)
        .with("products_hidden", hidden.len())
        .with("orders_cancelled", resolution.cancelled.len())
        .with("orders_settled", resolution.settled.len());

    let message = match action {
        Offline::Suspend { reason } => {
            user.status = UserStatus::Suspended;
            user.ban_until = None;
            user.status_reason = Some(reason.clone());
            record = record.with("reason", reason);
            format!("Your account has been suspended: {}", reason)
        }
        Offline::Ban { until, reason } => {
            user.status = UserStatus::Banned;
            user.ban_until = Some(*until);
            user.status_reason = Some(reason.clone());
            record = record.with("reason", reason).with("until", until.to_rfc3339());
            format!(
                "Your account has been banned until {}: {}",
                until.format("%Y-%m-%d %H:%M UTC"),
                reason
            )
        }
        Offline::Delete => {
            user.status = UserStatus::Suspended;
            user.ban_until = None;
            user.deleted_at = Some(now);
            "Your account has been deleted".to_string()
        }
    };
    user.penalty_warnings = 0;
    user.updated_at = now;
    txn.put_user(&user)?;
    txn.append_audit(&record)?;

    scope.notify(user_id, NotificationKind::AccountStatus, message, Some(user_id));

    Ok(ModerationOutcome {
        user,
        applied: true,
        products: hidden,
        resolution,
    })
}

/// Restore the user and the products moderation took offline
fn reactivate(
    scope: &mut Scope<'_, '_>,
    actor_id: Uuid,
    user_id: Uuid,
    action: &'static str,
) -> Result<ModerationOutcome> {
    let txn = scope.txn();
    let target = txn.user(user_id)?;

    if target.is_admin() {
        return Err(Error::Forbidden(
            "Administrator accounts cannot be reactivated".into(),
        ));
    }
    if target.deleted_at.is_some() {
        return Err(Error::Forbidden(format!(
            "Deleted account {} cannot be reactivated",
            user_id
        )));
    }
    if target.status == UserStatus::Active {
        return Ok(ModerationOutcome {
            user: target,
            applied: false,
            products: Vec::new(),
            resolution: Resolution::default(),
        });
    }

    let now = Utc::now();
    let mut product_ids = txn.product_ids_by_owner(user_id)?;
    product_ids.sort();

    let mut restored = Vec::new();
    for product_id in product_ids {
        let mut product = txn.lock_product(product_id)?;
        if product.hidden_by != Some(HideReason::OwnerUnavailable) {
            continue;
        }
        product.deleted_at = None;
        if product.stock > 0 {
            product.visibility = Visibility::All;
            product.hidden_by = None;
        } else {
            product.visibility = Visibility::OwnerAdmin;
            product.hidden_by = Some(HideReason::SoldOut);
        }
        product.updated_at = now;
        txn.put_product(&product)?;
        restored.push(product.id);
    }

    let mut user = txn.lock_user(user_id)?;
    let previous = user.status;
    user.status = UserStatus::Active;
    user.ban_until = None;
    user.status_reason = None;
    user.penalty_warnings = 0;
    user.updated_at = now;
    txn.put_user(&user)?;

    txn.append_audit(
        &AuditRecord::new(actor_id, action, user_id)
            .with("from", previous)
            .with("products_restored", restored.len()),
    )?;

    let message = if actor_id == SYSTEM_ACTOR {
        "Your ban has ended, your account is active again"
    } else {
        "Your account is active again"
    };
    scope.notify(user_id, NotificationKind::AccountStatus, message, Some(user_id));

    Ok(ModerationOutcome {
        user,
        applied: true,
        products: restored,
        resolution: Resolution::default(),
    })
}

fn validate_reason(reason: &str) -> Result<String> {
    let reason = reason.trim();
    let len = reason.chars().count();
    if !(MIN_REASON..=MAX_REASON).contains(&len) {
        return Err(Error::Validation(format!(
            "Reason must be between {} and {} characters",
            MIN_REASON, MAX_REASON
        )));
    }
    Ok(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::Role;

    #[test]
    fn test_reason_length() {
        assert!(validate_reason("too short").is_err());
        assert!(validate_reason(&"x".repeat(256)).is_err());
        assert_eq!(
            validate_reason("  Repeated counterfeit listings  ").unwrap(),
            "Repeated counterfeit listings"
        );
    }

    #[test]
    fn test_action_in_effect() {
        let mut user = User::new("Seller", Role::User);
        let suspend = Offline::Suspend {
            reason: "Counterfeit goods".into(),
        };
        assert!(!suspend.in_effect(&user));

        user.status = UserStatus::Suspended;
        assert!(suspend.in_effect(&user));
        assert!(!Offline::Delete.in_effect(&user));

        user.deleted_at = Some(Utc::now());
        assert!(Offline::Delete.in_effect(&user));
        assert!(suspend.in_effect(&user));
    }
}
