//! Shared harness for the escrow engine integration tests

#![allow(dead_code)]

use ledger_core::{Product, Role, User, Visibility};
use message_bus::{Notification, RecordingNotifier};
use settlement::{Actor, Config, Marketplace, NewProduct};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Engine on a scratch store plus the recorder its notifications land in
pub struct TestEnv {
    pub engine: Arc<Marketplace>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: Actor,
    _temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp_dir.path().to_path_buf();
        adjust(&mut config);

        let notifier = Arc::new(RecordingNotifier::new());
        let engine = Arc::new(Marketplace::open(config, notifier.clone()).unwrap());
        let admin = engine.register_user("Site Admin", Role::Admin).unwrap();

        Self {
            engine,
            notifier,
            admin: Actor::of(&admin),
            _temp_dir: temp_dir,
        }
    }

    /// Registered user with an optional opening balance
    pub fn user(&self, name: &str, balance: u64) -> Actor {
        let user = self.engine.register_user(name, Role::User).unwrap();
        let actor = Actor::of(&user);
        if balance > 0 {
            self.engine.top_up(&actor, balance).unwrap();
        }
        actor
    }

    /// Public product owned by `seller`
    pub fn product(&self, seller: &Actor, price: u64, stock: u32) -> Product {
        self.engine
            .create_product(
                seller,
                &NewProduct {
                    title: "Vintage camera".to_string(),
                    price,
                    stock,
                    visibility: Visibility::All,
                },
            )
            .unwrap()
    }

    pub fn balance(&self, actor: &Actor) -> u64 {
        self.engine.ledger().balance(actor.user_id).unwrap()
    }

    pub fn stored_user(&self, actor: &Actor) -> User {
        self.engine.ledger().storage().get_user(actor.user_id).unwrap()
    }

    pub fn stored_product(&self, product: &Product) -> Product {
        self.engine.ledger().storage().get_product(product.id).unwrap()
    }

    /// Replay every listed account's ledger
    pub fn assert_ledgers_consistent(&self, actors: &[&Actor]) {
        for actor in actors {
            let audit = self.engine.ledger().verify_user(actor.user_id).unwrap();
            assert_eq!(audit.balance, audit.computed_balance);
        }
    }
}

/// Poll the recorder until `predicate` holds or two seconds pass
pub async fn wait_for_notifications(
    notifier: &RecordingNotifier,
    predicate: impl Fn(&[Notification]) -> bool,
) -> Vec<Notification> {
    for _ in 0..200 {
        let delivered = notifier.delivered();
        if predicate(&delivered) {
            return delivered;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    notifier.delivered()
}
