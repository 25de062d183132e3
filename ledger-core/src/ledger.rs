//! Balance ledger orchestration layer
//!
//! This module ties together storage, hashing and metrics into the single
//! balance-changing operation of the system, [`Ledger::apply_delta`], and the
//! transaction runner every higher-level operation goes through.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{types::EntryKind, Ledger, Result};
//! use uuid::Uuid;
//!
//! fn top_up(ledger: &Ledger, user_id: Uuid) -> Result<()> {
//!     ledger.transact("top_up", |txn| {
//!         ledger.apply_delta(txn, user_id, 100_000, "Top up", EntryKind::Credit, None)?;
//!         Ok::<_, ledger_core::Error>(())
//!     })
//! }
//! ```

use crate::{
    crypto::{hash_entry, to_hex, GENESIS_HASH},
    error::Retryable,
    storage::{Storage, StoreTxn},
    types::{EntryKind, LedgerEntry, User},
    Config, Error, Metrics, Result,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Store access
    storage: Arc<Storage>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

/// Result of a debit that may only partially recover its amount
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedDebit {
    /// Amount actually taken from the balance
    pub recovered: u64,

    /// Amount that could not be taken (recorded as a `Shortfall` entry)
    pub shortfall: u64,

    /// Entries written (debit and/or shortfall marker)
    pub entries: Vec<LedgerEntry>,
}

/// Outcome of a replay of a user's ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Audited user
    pub user_id: Uuid,

    /// Number of entries replayed
    pub entries: u64,

    /// Cached balance on the user record
    pub balance: u64,

    /// Sum of all entry amounts
    pub computed_balance: u64,

    /// Sum of recorded shortfalls
    pub total_shortfall: u64,
}

impl Ledger {
    /// Open ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics =
            Metrics::new().map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            storage,
            metrics,
            config,
        })
    }

    /// Direct storage access (committed-state reads)
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` inside one store transaction and commit it.
    ///
    /// Any error from `f` rolls everything back. Conflicts (lock timeout,
    /// deadlock, busy) re-run `f` on a fresh transaction up to
    /// `transactions.max_retries` times, so `f` must not leak side effects
    /// outside the transaction.
    pub fn transact<T, E, F>(&self, operation: &str, mut f: F) -> std::result::Result<T, E>
    where
        F: FnMut(&StoreTxn<'_>) -> std::result::Result<T, E>,
        E: From<Error> + Retryable + std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let txn = self.storage.begin();
            let outcome = match f(&txn) {
                Ok(value) => {
                    let appended = txn.appended_kinds();
                    txn.commit().map(|()| (value, appended)).map_err(E::from)
                }
                Err(err) => {
                    // Locks must not be held through the retry backoff
                    if let Err(rollback_err) = txn.rollback() {
                        tracing::warn!(operation, error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            };

            match outcome {
                Ok((value, appended)) => {
                    for kind in appended {
                        self.metrics.record_entries(kind.as_str(), 1);
                    }
                    self.metrics.record_transaction(
                        operation,
                        "committed",
                        started.elapsed().as_secs_f64(),
                    );
                    return Ok(value);
                }
                Err(err) if err.is_conflict() && attempt < self.config.transactions.max_retries => {
                    attempt += 1;
                    self.metrics.record_retry(operation);
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %err,
                        "Transaction conflict, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(
                        self.config.transactions.retry_backoff_ms * u64::from(attempt),
                    ));
                }
                Err(err) => {
                    let outcome = if err.is_conflict() { "conflict" } else { "rejected" };
                    self.metrics.record_transaction(
                        operation,
                        outcome,
                        started.elapsed().as_secs_f64(),
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Apply a signed balance change inside the caller's transaction.
    ///
    /// Locks the user row, rejects a debit that would drive the balance below
    /// zero without writing anything, then updates the cached balance and
    /// appends one entry with the before/after snapshot.
    pub fn apply_delta(
        &self,
        txn: &StoreTxn<'_>,
        user_id: Uuid,
        amount: i64,
        description: impl Into<String>,
        kind: EntryKind,
        order_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        match kind {
            EntryKind::Credit | EntryKind::Refund if amount > 0 => {}
            EntryKind::Debit if amount < 0 => {}
            _ => {
                return Err(Error::InvalidEntry(format!(
                    "{} entry cannot carry amount {}",
                    kind.as_str(),
                    amount
                )))
            }
        }

        let mut user = txn.lock_user(user_id)?;
        let magnitude = amount.unsigned_abs();

        let final_balance = if amount > 0 {
            user.balance.checked_add(magnitude).ok_or_else(|| {
                Error::InvalidEntry(format!("Balance overflow for user {}", user_id))
            })?
        } else {
            user.balance
                .checked_sub(magnitude)
                .ok_or(Error::InsufficientBalance {
                    user_id,
                    balance: user.balance,
                    required: magnitude,
                })?
        };

        self.write_entry(txn, &mut user, amount, final_balance, kind, 0, description.into(), order_id)
    }

    /// Debit up to `amount`, never below zero.
    ///
    /// Whatever cannot be recovered is recorded as a zero-amount `Shortfall`
    /// entry so the loss stays visible without breaking `balance == Σ amount`.
    pub fn apply_clamped_debit(
        &self,
        txn: &StoreTxn<'_>,
        user_id: Uuid,
        amount: u64,
        description: impl Into<String>,
        order_id: Option<Uuid>,
    ) -> Result<ClampedDebit> {
        let description = description.into();
        let mut user = txn.lock_user(user_id)?;

        let recovered = user.balance.min(amount);
        let shortfall = amount - recovered;
        let mut entries = Vec::with_capacity(2);

        if recovered > 0 {
            let signed = i64::try_from(recovered).map_err(|_| {
                Error::InvalidEntry(format!("Debit amount {} out of range", recovered))
            })?;
            let final_balance = user.balance - recovered;
            entries.push(self.write_entry(
                txn,
                &mut user,
                -signed,
                final_balance,
                EntryKind::Debit,
                0,
                description.clone(),
                order_id,
            )?);
        }

        if shortfall > 0 {
            let balance = user.balance;
            entries.push(self.write_entry(
                txn,
                &mut user,
                0,
                balance,
                EntryKind::Shortfall,
                shortfall,
                format!("Unrecovered: {}", description),
                order_id,
            )?);

            tracing::warn!(
                user_id = %user_id,
                requested = amount,
                recovered,
                shortfall,
                "Debit clamped at zero balance"
            );
        }

        Ok(ClampedDebit {
            recovered,
            shortfall,
            entries,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn write_entry(
        &self,
        txn: &StoreTxn<'_>,
        user: &mut User,
        amount: i64,
        final_balance: u64,
        kind: EntryKind,
        shortfall: u64,
        description: String,
        order_id: Option<Uuid>,
    ) -> Result<LedgerEntry> {
        let now = Utc::now();
        let mut entry = LedgerEntry {
            id: Uuid::now_v7(),
            user_id: user.id,
            seq: user.entry_seq + 1,
            order_id,
            description,
            amount,
            last_balance: user.balance,
            final_balance,
            kind,
            shortfall,
            prev_hash: user.entry_head,
            hash: GENESIS_HASH,
            created_at: now,
        };
        entry.hash = hash_entry(&entry);

        user.balance = final_balance;
        user.entry_seq = entry.seq;
        user.entry_head = entry.hash;
        user.updated_at = now;

        // Cache update and entry append land in the same transaction
        txn.put_user(user)?;
        txn.append_entry(&entry)?;

        Ok(entry)
    }

    /// Current cached balance
    pub fn balance(&self, user_id: Uuid) -> Result<u64> {
        Ok(self.storage.get_user(user_id)?.balance)
    }

    /// Newest `limit` entries of a user
    pub fn entries(&self, user_id: Uuid, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.storage.entries(user_id, limit)
    }

    /// Replay a user's ledger and check it against the cached balance.
    ///
    /// Checks snapshot continuity, arithmetic of every entry, the hash chain
    /// and `balance == Σ amount`.
    pub fn verify_user(&self, user_id: Uuid) -> Result<LedgerAudit> {
        let user = self.storage.get_user(user_id)?;
        let entries = self.storage.all_entries(user_id)?;

        let mut running: u64 = 0;
        let mut prev_hash = GENESIS_HASH;
        let mut total_shortfall: u64 = 0;

        for (index, entry) in entries.iter().enumerate() {
            let expected_seq = index as u64 + 1;
            if entry.seq != expected_seq {
                return Err(Error::InvariantViolation(format!(
                    "User {} entry seq {} where {} expected",
                    user_id, entry.seq, expected_seq
                )));
            }
            if entry.last_balance != running {
                return Err(Error::InvariantViolation(format!(
                    "User {} entry #{} starts at {} but balance was {}",
                    user_id, entry.seq, entry.last_balance, running
                )));
            }
            let next = i128::from(running) + i128::from(entry.amount);
            if next < 0 || next != i128::from(entry.final_balance) {
                return Err(Error::InvariantViolation(format!(
                    "User {} entry #{}: {} + {} != {}",
                    user_id, entry.seq, entry.last_balance, entry.amount, entry.final_balance
                )));
            }
            if entry.prev_hash != prev_hash || hash_entry(entry) != entry.hash {
                return Err(Error::InvariantViolation(format!(
                    "User {} entry #{} breaks the hash chain ({})",
                    user_id,
                    entry.seq,
                    to_hex(&entry.hash)
                )));
            }

            running = entry.final_balance;
            prev_hash = entry.hash;
            total_shortfall += entry.shortfall;
        }

        if user.balance != running || user.entry_head != prev_hash {
            return Err(Error::InvariantViolation(format!(
                "User {} cached balance {} but ledger sums to {}",
                user_id, user.balance, running
            )));
        }

        Ok(LedgerAudit {
            user_id,
            entries: entries.len() as u64,
            balance: user.balance,
            computed_balance: running,
            total_shortfall,
        })
    }
}
