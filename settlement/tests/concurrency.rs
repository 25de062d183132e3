//! Concurrent access to shared rows
//!
//! Operations block on row locks, so plain threads are enough to race them.

mod common;

use common::TestEnv;
use ledger_core::OrderStatus;
use settlement::{Error, ErrorKind, PurchaseItem, ReceiptConfirmation};
use std::sync::{Arc, Barrier};
use std::thread;

const BUYERS: usize = 8;

#[test]
fn test_last_unit_is_sold_once() {
    let env = TestEnv::new();
    let seller = env.user("Sam Seller", 0);
    let product = env.product(&seller, 50_000, 1);
    let buyers: Vec<_> = (0..BUYERS)
        .map(|i| env.user(&format!("Buyer {}", i), 100_000))
        .collect();

    let barrier = Arc::new(Barrier::new(BUYERS));
    let handles: Vec<_> = buyers
        .iter()
        .copied()
        .map(|buyer| {
            let engine = Arc::clone(&env.engine);
            let barrier = Arc::clone(&barrier);
            let product_id = product.id;
            thread::spawn(move || {
                barrier.wait();
                engine.purchase(&buyer, &[PurchaseItem { product_id, quantity: 1 }])
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    for err in results.into_iter().filter_map(|r| r.err()) {
        // Losers either saw the sold-out product or lost the lock race
        assert!(
            matches!(
                err,
                Error::ProductUnavailable(_) | Error::InsufficientStock { .. }
            ) || err.kind() == ErrorKind::Conflict,
            "unexpected error: {}",
            err
        );
    }

    assert_eq!(env.stored_product(&product).stock, 0);
    let charged: Vec<_> = buyers
        .iter()
        .filter(|b| env.balance(b) == 47_500)
        .collect();
    assert_eq!(charged.len(), 1);
    assert!(buyers
        .iter()
        .all(|b| env.balance(b) == 47_500 || env.balance(b) == 100_000));

    let refs: Vec<_> = buyers.iter().collect();
    env.assert_ledgers_consistent(&refs);
}

#[test]
fn test_concurrent_cancel_and_ship_pick_one_outcome() {
    let env = TestEnv::new();
    let seller = env.user("Sam Seller", 0);
    let buyer = env.user("Bea Buyer", 100_000);
    let product = env.product(&seller, 50_000, 1);
    let order = env
        .engine
        .purchase(&buyer, &[PurchaseItem { product_id: product.id, quantity: 1 }])
        .unwrap()
        .remove(0);

    let barrier = Arc::new(Barrier::new(2));
    let cancel = {
        let engine = Arc::clone(&env.engine);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            engine.cancel(&buyer, &[order.id])
        })
    };
    let ship = {
        let engine = Arc::clone(&env.engine);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            engine.confirm_shipment(&seller, &[order.id])
        })
    };

    let cancelled = cancel.join().unwrap();
    let shipped = ship.join().unwrap();
    assert!(cancelled.is_ok() != shipped.is_ok());

    let order = env.engine.order(&buyer, order.id).unwrap();
    if cancelled.is_ok() {
        assert_eq!(order.status, OrderStatus::Cancel);
        assert_eq!(env.balance(&buyer), 100_000);
        assert_eq!(env.stored_product(&product).stock, 1);
    } else {
        assert_eq!(order.status, OrderStatus::WaitingUsers);
        assert_eq!(env.balance(&buyer), 47_500);
        env.engine
            .confirm_receipt(&buyer, &[ReceiptConfirmation::new(order.id)])
            .unwrap();
        assert_eq!(env.balance(&seller), 49_000);
    }

    env.assert_ledgers_consistent(&[&buyer, &seller]);
}

#[test]
fn test_parallel_settlements_credit_every_sale() {
    let env = TestEnv::new();
    let seller = env.user("Sam Seller", 0);
    let product = env.product(&seller, 10_000, BUYERS as u32);

    let mut pairs = Vec::new();
    for i in 0..BUYERS {
        let buyer = env.user(&format!("Buyer {}", i), 20_000);
        let order = env
            .engine
            .purchase(&buyer, &[PurchaseItem { product_id: product.id, quantity: 1 }])
            .unwrap()
            .remove(0);
        env.engine.confirm_shipment(&seller, &[order.id]).unwrap();
        pairs.push((buyer, order.id));
    }

    let barrier = Arc::new(Barrier::new(BUYERS));
    let handles: Vec<_> = pairs
        .iter()
        .copied()
        .map(|(buyer, order_id)| {
            let engine = Arc::clone(&env.engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.confirm_receipt(&buyer, &[ReceiptConfirmation::new(order_id)])
            })
        })
        .collect();

    let mut failures = 0;
    for handle in handles {
        if handle.join().unwrap().is_err() {
            failures += 1;
        }
    }

    // Every payout lands on the same seller row; retries absorb the contention
    let settled = BUYERS - failures;
    assert_eq!(env.balance(&seller), settled as u64 * 9_800);

    let audit = env.engine.ledger().verify_user(seller.user_id).unwrap();
    assert_eq!(audit.entries, settled as u64);
    assert_eq!(audit.balance, audit.computed_balance);
}

#[test]
fn test_overlapping_baskets_lock_in_the_same_order() {
    // Without deadlock detection or retries a lock-order cycle would surface as an error
    let env = TestEnv::with_config(|config| {
        config.ledger.transactions.deadlock_detect = false;
        config.ledger.transactions.max_retries = 0;
    });
    let seller = env.user("Sam Seller", 0);
    let lamp = env.product(&seller, 1_000, 40);
    let rug = env.product(&seller, 1_000, 40);
    let first = env.user("Bea Buyer", 100_000);
    let second = env.user("Bob Buyer", 100_000);

    let rounds = 20;
    let barrier = Arc::new(Barrier::new(2));
    let baskets = [
        (first, [lamp.id, rug.id]),
        (second, [rug.id, lamp.id]),
    ];
    let handles: Vec<_> = baskets
        .into_iter()
        .map(|(buyer, ids)| {
            let engine = Arc::clone(&env.engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let items: Vec<_> = ids
                    .iter()
                    .map(|&product_id| PurchaseItem { product_id, quantity: 1 })
                    .collect();
                (0..rounds)
                    .map(|_| {
                        barrier.wait();
                        engine.purchase(&buyer, &items)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for result in handle.join().unwrap() {
            assert!(result.is_ok(), "purchase failed: {:?}", result.err());
        }
    }

    assert_eq!(env.stored_product(&lamp).stock, 0);
    assert_eq!(env.stored_product(&rug).stock, 0);
    assert_eq!(env.balance(&first), 100_000 - 20 * 2 * 1_050);
    env.assert_ledgers_consistent(&[&first, &second]);
}
