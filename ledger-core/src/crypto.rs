//! Hash chaining for ledger entries
//!
//! Every entry commits to the hash of the user's previous entry, so editing
//! or dropping any historical entry breaks every hash after it.

use crate::types::LedgerEntry;
use sha2::{Digest, Sha256};

/// Chain head before a user's first entry
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// SHA-256 over the previous hash and every field of the entry except `hash`
pub fn hash_entry(entry: &LedgerEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update(entry.prev_hash);
    hasher.update(entry.id.as_bytes());
    hasher.update(entry.user_id.as_bytes());
    hasher.update(entry.seq.to_be_bytes());
    match entry.order_id {
        Some(order_id) => {
            hasher.update([1u8]);
            hasher.update(order_id.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update(entry.amount.to_be_bytes());
    hasher.update(entry.last_balance.to_be_bytes());
    hasher.update(entry.final_balance.to_be_bytes());
    hasher.update([entry.kind.tag()]);
    hasher.update(entry.shortfall.to_be_bytes());
    hasher.update(entry.created_at.timestamp_micros().to_be_bytes());
    hasher.update((entry.description.len() as u64).to_be_bytes());
    hasher.update(entry.description.as_bytes());

    hasher.finalize().into()
}

/// Hex encoding for logs and audit output
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryKind;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry() -> LedgerEntry {
        LedgerEntry {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            seq: 1,
            order_id: None,
            description: "Top up".to_string(),
            amount: 100_000,
            last_balance: 0,
            final_balance: 100_000,
            kind: EntryKind::Credit,
            shortfall: 0,
            prev_hash: GENESIS_HASH,
            hash: GENESIS_HASH,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_hash_deterministic() {
        let e = entry();
        assert_eq!(hash_entry(&e), hash_entry(&e));
    }

    #[test]
    fn test_hash_ignores_own_hash_field() {
        let mut e = entry();
        let h = hash_entry(&e);
        e.hash = h;
        assert_eq!(hash_entry(&e), h);
    }

    #[test]
    fn test_hash_detects_tampering() {
        let e = entry();
        let h = hash_entry(&e);

        let mut amount = e.clone();
        amount.amount = 100_001;
        assert_ne!(hash_entry(&amount), h);

        let mut prev = e.clone();
        prev.prev_hash = [7u8; 32];
        assert_ne!(hash_entry(&prev), h);

        let mut order = e;
        order.order_id = Some(Uuid::nil());
        assert_ne!(hash_entry(&order), h);
    }

    #[test]
    fn test_hex() {
        let mut h = [0u8; 32];
        h[0] = 0xab;
        h[31] = 0x01;
        let hex = to_hex(&h);
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("ab00"));
        assert!(hex.ends_with("01"));
    }
}
