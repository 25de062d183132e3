//! Account registration and balance operations

use crate::{
    effects::signed,
    engine::Marketplace,
    types::{Actor, BalanceStatement, EntryView},
    Error, Result,
};
use ledger_core::{EntryKind, LedgerAudit, LedgerEntry, Role, User};
use message_bus::NotificationKind;
use uuid::Uuid;

impl Marketplace {
    /// Create an active account with a zero balance
    pub fn register_user(&self, full_name: &str, role: Role) -> Result<User> {
        let full_name = full_name.trim();
        let len = full_name.chars().count();
        if !(3..=100).contains(&len) {
            return Err(Error::Validation(
                "Full name must be between 3 and 100 characters".into(),
            ));
        }
        if role == Role::Guest {
            return Err(Error::Validation("Guests cannot register an account".into()));
        }

        let user = User::new(full_name, role);
        self.run("register_user", |scope| {
            scope.txn().insert_user(&user)?;
            Ok(())
        })?;

        tracing::info!(user_id = %user.id, role = ?user.role, "User registered");
        Ok(user)
    }

    /// Add funds to the caller's balance
    pub fn top_up(&self, actor: &Actor, amount: u64) -> Result<LedgerEntry> {
        let limits = &self.config().accounts;
        if amount < limits.min_top_up || amount > limits.max_top_up {
            return Err(Error::Validation(format!(
                "Top-up amount must be between {} and {}",
                limits.min_top_up, limits.max_top_up
            )));
        }
        self.check_account(actor.user_id)?;

        let entry = self.run("top_up", |scope| {
            scope.require_active(actor)?;
            let entry = scope.ledger().apply_delta(
                scope.txn(),
                actor.user_id,
                signed(amount)?,
                "Top up",
                EntryKind::Credit,
                None,
            )?;
            scope.notify(
                actor.user_id,
                NotificationKind::TopUp,
                format!(
                    "Top-up of {} succeeded, balance is now {}",
                    amount, entry.final_balance
                ),
                Some(entry.id),
            );
            Ok(entry)
        })?;

        tracing::info!(
            user_id = %actor.user_id,
            amount,
            balance = entry.final_balance,
            "Balance topped up"
        );
        Ok(entry)
    }

    /// Take funds out of the caller's balance
    pub fn withdraw(&self, actor: &Actor, amount: u64) -> Result<LedgerEntry> {
        let limits = &self.config().accounts;
        if amount < limits.min_withdraw || amount > limits.max_withdraw {
            return Err(Error::Validation(format!(
                "Withdrawal amount must be between {} and {}",
                limits.min_withdraw, limits.max_withdraw
            )));
        }
        self.check_account(actor.user_id)?;

        let entry = self.run("withdraw", |scope| {
            scope.require_active(actor)?;
            let entry = scope.ledger().apply_delta(
                scope.txn(),
                actor.user_id,
                -signed(amount)?,
                "Withdrawal",
                EntryKind::Debit,
                None,
            )?;
            scope.notify(
                actor.user_id,
                NotificationKind::Withdraw,
                format!(
                    "Withdrawal of {} succeeded, balance is now {}",
                    amount, entry.final_balance
                ),
                Some(entry.id),
            );
            Ok(entry)
        })?;

        tracing::info!(
            user_id = %actor.user_id,
            amount,
            balance = entry.final_balance,
            "Balance withdrawn"
        );
        Ok(entry)
    }

    /// Cached balance and the newest entries (default page size from config)
    pub fn balance_statement(&self, actor: &Actor, limit: Option<usize>) -> Result<BalanceStatement> {
        let user = self.check_account(actor.user_id)?;
        let limit = limit.unwrap_or(self.config().accounts.statement_limit);

        let entries = self
            .ledger()
            .entries(user.id, limit)?
            .iter()
            .map(EntryView::from)
            .collect();

        Ok(BalanceStatement {
            balance: user.balance,
            entries,
        })
    }

    /// Replay a user's ledger (administrators only)
    pub fn verify_account(&self, admin: &Actor, user_id: Uuid) -> Result<LedgerAudit> {
        self.require_admin_reader(admin)?;
        let audit = self.ledger().verify_user(user_id)?;

        tracing::info!(
            user_id = %user_id,
            entries = audit.entries,
            balance = audit.balance,
            shortfall = audit.total_shortfall,
            "Ledger verified"
        );
        Ok(audit)
    }
}
