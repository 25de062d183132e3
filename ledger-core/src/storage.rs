//! Storage layer using RocksDB pessimistic transactions
//!
//! # Column Families
//!
//! - `users` - User records (key: user_id)
//! - `products` - Catalog (key: product_id)
//! - `orders` - Orders (key: order_id)
//! - `entries` - Append-only balance ledger (key: user_id || seq)
//! - `reviews` - Order reviews (key: order_id)
//! - `audit` - Administrator action log (key: record_id, time ordered)
//! - `indices` - Secondary indices for fast lookups (key: tag || parent || child)
//!
//! # Locking
//!
//! Every read that feeds a decision goes through one of the `lock_*` methods
//! of [`StoreTxn`], which take an exclusive row lock (`get_for_update`) held
//! until commit or rollback. Acquire in the order products, orders, users.

use crate::{
    error::{Error, Result},
    types::{AuditRecord, EntryKind, LedgerEntry, Order, Product, Review, User, UserStatus},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, SingleThreaded,
    Transaction, TransactionDBOptions, TransactionOptions, WriteOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use std::cell::RefCell;
use uuid::Uuid;

/// Column family names
const CF_USERS: &str = "users";
const CF_PRODUCTS: &str = "products";
const CF_ORDERS: &str = "orders";
const CF_ENTRIES: &str = "entries";
const CF_REVIEWS: &str = "reviews";
const CF_AUDIT: &str = "audit";
const CF_INDICES: &str = "indices";

/// Index tags
const IDX_OWNER_PRODUCT: u8 = b'O';
const IDX_PRODUCT_ORDER: u8 = b'P';
const IDX_BUYER_ORDER: u8 = b'B';
const IDX_SELLER_ORDER: u8 = b'S';
const IDX_BANNED_USER: u8 = b'N';

/// Column family handles are borrowed from the database, not reference counted
type TransactionDB = rocksdb::TransactionDB<SingleThreaded>;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: TransactionDB,
    lock_timeout_ms: i64,
    deadlock_detect: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("lock_timeout_ms", &self.lock_timeout_ms)
            .field("deadlock_detect", &self.deadlock_detect)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.transactions.lock_timeout_ms);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_PRODUCTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_ORDERS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_REVIEWS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_AUDIT, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB transaction store");

        Ok(Self {
            db,
            lock_timeout_ms: config.transactions.lock_timeout_ms,
            deadlock_detect: config.transactions.deadlock_detect,
        })
    }

    // Column family options

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        // Records are read on every request, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Start a pessimistic transaction
    pub fn begin(&self) -> StoreTxn<'_> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(self.lock_timeout_ms);
        txn_opts.set_deadlock_detect(self.deadlock_detect);

        StoreTxn {
            txn: self.db.transaction_opt(&WriteOptions::default(), &txn_opts),
            storage: self,
            appended: RefCell::new(Vec::new()),
        }
    }

    // Committed-state reads

    fn get_record<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Get user by ID
    pub fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.get_record(CF_USERS, user_id.as_bytes())?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    /// Get product by ID
    pub fn get_product(&self, product_id: Uuid) -> Result<Product> {
        self.get_record(CF_PRODUCTS, product_id.as_bytes())?
            .ok_or_else(|| Error::ProductNotFound(product_id.to_string()))
    }

    /// Get order by ID
    pub fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.get_record(CF_ORDERS, order_id.as_bytes())?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    /// Get the review attached to an order
    pub fn get_review(&self, order_id: Uuid) -> Result<Option<Review>> {
        self.get_record(CF_REVIEWS, order_id.as_bytes())
    }

    /// Products owned by a user
    pub fn product_ids_by_owner(&self, owner_id: Uuid) -> Result<Vec<Uuid>> {
        self.scan_index(IDX_OWNER_PRODUCT, owner_id)
    }

    /// Orders placed on a product
    pub fn order_ids_by_product(&self, product_id: Uuid) -> Result<Vec<Uuid>> {
        self.scan_index(IDX_PRODUCT_ORDER, product_id)
    }

    /// Orders placed by a buyer
    pub fn order_ids_by_buyer(&self, buyer_id: Uuid) -> Result<Vec<Uuid>> {
        self.scan_index(IDX_BUYER_ORDER, buyer_id)
    }

    /// Orders placed with a seller
    pub fn order_ids_by_seller(&self, seller_id: Uuid) -> Result<Vec<Uuid>> {
        self.scan_index(IDX_SELLER_ORDER, seller_id)
    }

    /// Users currently banned (expired or not)
    pub fn banned_user_ids(&self) -> Result<Vec<Uuid>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = [IDX_BANNED_USER];
        collect_ids(
            self.db
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )
    }

    fn scan_index(&self, tag: u8, parent: Uuid) -> Result<Vec<Uuid>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = index_key(tag, parent, None);
        collect_ids(
            self.db
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )
    }

    /// A user's ledger entries, newest first
    pub fn entries(&self, user_id: Uuid, limit: usize) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = user_id.as_bytes().to_vec();
        let upper = entry_key(user_id, u64::MAX);

        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || entries.len() >= limit {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// A user's complete ledger history, oldest first
    pub fn all_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let prefix = user_id.as_bytes().to_vec();

        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Every user, including soft-deleted ones
    pub fn users(&self) -> Result<Vec<User>> {
        self.scan_records(CF_USERS)
    }

    /// Every order
    pub fn orders(&self) -> Result<Vec<Order>> {
        self.scan_records(CF_ORDERS)
    }

    /// Every ledger entry, grouped by user and oldest first within a user
    pub fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.scan_records(CF_ENTRIES)
    }

    fn scan_records<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf_name)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Administrator actions, newest first
    pub fn audit_records(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let cf = self.cf_handle(CF_AUDIT)?;

        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            if records.len() >= limit {
                break;
            }
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }
}

/// One store-level transaction.
///
/// Dropping a `StoreTxn` without calling [`StoreTxn::commit`] rolls it back.
pub struct StoreTxn<'db> {
    txn: Transaction<'db, TransactionDB>,
    storage: &'db Storage,
    appended: RefCell<Vec<EntryKind>>,
}

impl std::fmt::Debug for StoreTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTxn").finish_non_exhaustive()
    }
}

impl<'db> StoreTxn<'db> {
    fn lock_record<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.storage.cf_handle(cf_name)?;
        match self.txn.get_for_update_cf(cf, key, true)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn read_record<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.storage.cf_handle(cf_name)?;
        match self.txn.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(&self, cf_name: &str, key: &[u8], record: &T) -> Result<()> {
        let cf = self.storage.cf_handle(cf_name)?;
        let value = bincode::serialize(record)?;
        self.txn.put_cf(cf, key, value)?;
        Ok(())
    }

    fn put_index(&self, tag: u8, parent: Uuid, child: Uuid) -> Result<()> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        self.txn.put_cf(cf, index_key(tag, parent, Some(child)), b"")?;
        Ok(())
    }

    fn scan_index(&self, tag: u8, parent: Uuid) -> Result<Vec<Uuid>> {
        let cf = self.storage.cf_handle(CF_INDICES)?;
        let prefix = index_key(tag, parent, None);
        collect_ids(
            self.txn
                .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)),
            &prefix,
        )
    }

    // Locking reads

    /// Read a user and hold its row lock until the transaction ends
    pub fn lock_user(&self, user_id: Uuid) -> Result<User> {
        self.lock_record(CF_USERS, user_id.as_bytes())?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    /// Read a product and hold its row lock until the transaction ends
    pub fn lock_product(&self, product_id: Uuid) -> Result<Product> {
        self.lock_record(CF_PRODUCTS, product_id.as_bytes())?
            .ok_or_else(|| Error::ProductNotFound(product_id.to_string()))
    }

    /// Read an order and hold its row lock until the transaction ends
    pub fn lock_order(&self, order_id: Uuid) -> Result<Order> {
        self.lock_record(CF_ORDERS, order_id.as_bytes())?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    // Plain reads (see this transaction's own writes, take no lock)

    /// Read a user without locking it
    pub fn user(&self, user_id: Uuid) -> Result<User> {
        self.read_record(CF_USERS, user_id.as_bytes())?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    /// Read an order without locking it
    pub fn order(&self, order_id: Uuid) -> Result<Order> {
        self.read_record(CF_ORDERS, order_id.as_bytes())?
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    /// Whether an order already carries a review
    pub fn has_review(&self, order_id: Uuid) -> Result<bool> {
        Ok(self
            .read_record::<Review>(CF_REVIEWS, order_id.as_bytes())?
            .is_some())
    }

    /// Orders placed on a product, including ones inserted by this transaction
    pub fn order_ids_by_product(&self, product_id: Uuid) -> Result<Vec<Uuid>> {
        self.scan_index(IDX_PRODUCT_ORDER, product_id)
    }

    /// Products owned by a user, including ones inserted by this transaction
    pub fn product_ids_by_owner(&self, owner_id: Uuid) -> Result<Vec<Uuid>> {
        self.scan_index(IDX_OWNER_PRODUCT, owner_id)
    }

    // Writes

    /// Insert a new user
    pub fn insert_user(&self, user: &User) -> Result<()> {
        if self.read_record::<User>(CF_USERS, user.id.as_bytes())?.is_some() {
            return Err(Error::InvariantViolation(format!(
                "User {} already exists",
                user.id
            )));
        }
        self.put_user(user)
    }

    /// Write a user record and keep the ban index in step with its status
    pub fn put_user(&self, user: &User) -> Result<()> {
        self.put_record(CF_USERS, user.id.as_bytes(), user)?;

        let cf = self.storage.cf_handle(CF_INDICES)?;
        let key = banned_key(user.id);
        if user.status == UserStatus::Banned {
            self.txn.put_cf(cf, key, b"")?;
        } else {
            self.txn.delete_cf(cf, key)?;
        }
        Ok(())
    }

    /// Insert a new product and its owner index
    pub fn insert_product(&self, product: &Product) -> Result<()> {
        self.put_product(product)?;
        self.put_index(IDX_OWNER_PRODUCT, product.owner_id, product.id)
    }

    /// Write a product record
    pub fn put_product(&self, product: &Product) -> Result<()> {
        self.put_record(CF_PRODUCTS, product.id.as_bytes(), product)
    }

    /// Insert a new order and its product, buyer and seller indices
    pub fn insert_order(&self, order: &Order) -> Result<()> {
        self.put_order(order)?;
        self.put_index(IDX_PRODUCT_ORDER, order.product_id, order.id)?;
        self.put_index(IDX_BUYER_ORDER, order.buyer_id, order.id)?;
        self.put_index(IDX_SELLER_ORDER, order.seller_id, order.id)?;

        tracing::debug!(
            order_id = %order.id,
            product_id = %order.product_id,
            buyer_id = %order.buyer_id,
            "Order inserted"
        );

        Ok(())
    }

    /// Write an order record
    pub fn put_order(&self, order: &Order) -> Result<()> {
        self.put_record(CF_ORDERS, order.id.as_bytes(), order)
    }

    /// Append a ledger entry. Entries are never overwritten.
    pub fn append_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let key = entry_key(entry.user_id, entry.seq);
        let cf = self.storage.cf_handle(CF_ENTRIES)?;
        if self.txn.get_for_update_cf(cf, &key, true)?.is_some() {
            return Err(Error::InvariantViolation(format!(
                "Ledger entry {}#{} already exists",
                entry.user_id, entry.seq
            )));
        }
        self.put_record(CF_ENTRIES, &key, entry)?;
        self.appended.borrow_mut().push(entry.kind);

        tracing::debug!(
            entry_id = %entry.id,
            user_id = %entry.user_id,
            seq = entry.seq,
            amount = entry.amount,
            "Ledger entry appended"
        );

        Ok(())
    }

    /// Store the review of an order
    pub fn put_review(&self, review: &Review) -> Result<()> {
        self.put_record(CF_REVIEWS, review.order_id.as_bytes(), review)
    }

    /// Append an administrator action record
    pub fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        self.put_record(CF_AUDIT, record.id.as_bytes(), record)
    }

    /// Kinds of the ledger entries appended so far
    pub fn appended_kinds(&self) -> Vec<EntryKind> {
        self.appended.borrow().clone()
    }

    /// Commit. On failure the transaction is rolled back.
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every write and release the row locks now
    pub fn rollback(self) -> Result<()> {
        self.txn.rollback()?;
        Ok(())
    }
}

// Key helpers

fn index_key(tag: u8, parent: Uuid, child: Option<Uuid>) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(tag);
    key.extend_from_slice(parent.as_bytes());
    if let Some(child) = child {
        key.extend_from_slice(child.as_bytes());
    }
    key
}

fn banned_key(user_id: Uuid) -> Vec<u8> {
    let mut key = vec![IDX_BANNED_USER];
    key.extend_from_slice(user_id.as_bytes());
    key
}

fn entry_key(user_id: Uuid, seq: u64) -> Vec<u8> {
    let mut key = user_id.as_bytes().to_vec();
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn collect_ids<I>(iter: I, prefix: &[u8]) -> Result<Vec<Uuid>>
where
    I: Iterator<Item = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut ids = Vec::new();
    for item in iter {
        let (key, _) = item?;
        if !key.starts_with(prefix) {
            break;
        }
        let id = Uuid::from_slice(&key[prefix.len()..])
            .map_err(|e| Error::Storage(format!("Corrupt index key: {}", e)))?;
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, Role, Visibility};
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.transactions.lock_timeout_ms = 50;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_product(owner_id: Uuid) -> Product {
        Product {
            id: Uuid::now_v7(),
            owner_id,
            title: "Lamp".to_string(),
            price: 10_000,
            stock: 3,
            visibility: Visibility::All,
            hidden_by: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_order(product: &Product, buyer_id: Uuid) -> Order {
        Order {
            id: Uuid::now_v7(),
            product_id: product.id,
            product_title: product.title.clone(),
            buyer_id,
            seller_id: product.owner_id,
            quantity: 1,
            unit_price: product.price,
            total_price: product.price,
            govt_tax: 500,
            ecommerce_tax: 200,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        for cf in [CF_USERS, CF_PRODUCTS, CF_ORDERS, CF_ENTRIES, CF_REVIEWS, CF_AUDIT, CF_INDICES] {
            assert!(storage.db.cf_handle(cf).is_some());
        }
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let (storage, _temp) = test_storage();
        let user = User::new("Sari", Role::User);

        let txn = storage.begin();
        txn.insert_user(&user).unwrap();
        assert!(storage.get_user(user.id).is_err());
        txn.commit().unwrap();

        assert_eq!(storage.get_user(user.id).unwrap().full_name, "Sari");
    }

    #[test]
    fn test_full_scans() {
        let (storage, _temp) = test_storage();
        let seller = User::new("Sari", Role::User);
        let buyer = User::new("Budi", Role::User);
        let product = test_product(seller.id);
        let order = test_order(&product, buyer.id);

        let txn = storage.begin();
        txn.insert_user(&seller).unwrap();
        txn.insert_user(&buyer).unwrap();
        txn.insert_product(&product).unwrap();
        txn.insert_order(&order).unwrap();
        txn.commit().unwrap();

        let mut names: Vec<_> = storage.users().unwrap().into_iter().map(|u| u.full_name).collect();
        names.sort();
        assert_eq!(names, vec!["Budi", "Sari"]);
        assert_eq!(storage.orders().unwrap(), vec![order]);
        assert!(storage.ledger_entries().unwrap().is_empty());
    }

    #[test]
    fn test_drop_rolls_back() {
        let (storage, _temp) = test_storage();
        let user = User::new("Budi", Role::User);

        {
            let txn = storage.begin();
            txn.insert_user(&user).unwrap();
        }

        assert!(matches!(
            storage.get_user(user.id),
            Err(Error::UserNotFound(_))
        ));
    }

    #[test]
    fn test_order_indices() {
        let (storage, _temp) = test_storage();
        let seller = Uuid::now_v7();
        let buyer = Uuid::now_v7();
        let product = test_product(seller);

        let txn = storage.begin();
        txn.insert_product(&product).unwrap();
        let first = test_order(&product, buyer);
        let second = test_order(&product, buyer);
        txn.insert_order(&first).unwrap();
        txn.insert_order(&second).unwrap();

        // Uncommitted index entries are visible inside the transaction
        assert_eq!(txn.order_ids_by_product(product.id).unwrap().len(), 2);
        txn.commit().unwrap();

        assert_eq!(storage.product_ids_by_owner(seller).unwrap(), vec![product.id]);
        assert_eq!(
            storage.order_ids_by_product(product.id).unwrap(),
            vec![first.id, second.id]
        );
        assert_eq!(storage.order_ids_by_buyer(buyer).unwrap().len(), 2);
        assert_eq!(storage.order_ids_by_seller(seller).unwrap().len(), 2);
        assert!(storage.order_ids_by_buyer(seller).unwrap().is_empty());
    }

    #[test]
    fn test_row_lock_blocks_second_writer() {
        let (storage, _temp) = test_storage();
        let user = User::new("Citra", Role::User);
        let txn = storage.begin();
        txn.insert_user(&user).unwrap();
        txn.commit().unwrap();

        let holder = storage.begin();
        holder.lock_user(user.id).unwrap();

        let contender = storage.begin();
        let err = contender.lock_user(user.id).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_ban_index_follows_status() {
        let (storage, _temp) = test_storage();
        let mut user = User::new("Eka", Role::User);

        let txn = storage.begin();
        txn.insert_user(&user).unwrap();
        txn.commit().unwrap();
        assert!(storage.banned_user_ids().unwrap().is_empty());

        user.status = UserStatus::Banned;
        let txn = storage.begin();
        txn.put_user(&user).unwrap();
        txn.commit().unwrap();
        assert_eq!(storage.banned_user_ids().unwrap(), vec![user.id]);

        user.status = UserStatus::Active;
        let txn = storage.begin();
        txn.put_user(&user).unwrap();
        txn.commit().unwrap();
        assert!(storage.banned_user_ids().unwrap().is_empty());
    }

    #[test]
    fn test_audit_newest_first() {
        let (storage, _temp) = test_storage();
        let admin = Uuid::now_v7();

        let txn = storage.begin();
        for action in ["suspend_user", "ban_user", "delete_user"] {
            txn.append_audit(&AuditRecord::new(admin, action, Uuid::now_v7()))
                .unwrap();
        }
        txn.commit().unwrap();

        let records = storage.audit_records(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, "delete_user");
        assert_eq!(records[1].action, "ban_user");
    }
}
