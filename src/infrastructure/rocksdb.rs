use crate::domain::order::Order;
use crate::domain::payment::{IntentStatus, PaymentIntent};
use crate::domain::ports::{
    AppendOutcome, InsertOutcome, LedgerStore, OrderStore, PaymentIntentStore,
};
use crate::domain::wallet::{WalletAccount, WalletTransaction};
use crate::domain::{OrderId, UserId};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for order documents, keyed by order id.
pub const CF_ORDERS: &str = "orders";
/// Column Family mapping client idempotency keys to order ids.
pub const CF_ORDER_KEYS: &str = "order_keys";
/// Column Family for wallet accounts, keyed by user id.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for ledger entries, keyed by user id then entry id.
pub const CF_WALLET_TRANSACTIONS: &str = "wallet_transactions";
/// Column Family mapping (user id, reference) to the entry key.
pub const CF_LEDGER_REFS: &str = "ledger_refs";
/// Column Family for payment intents, keyed by gateway order id.
pub const CF_PAYMENT_INTENTS: &str = "payment_intents";
/// Column Family for counters.
pub const CF_META: &str = "meta";

const ORDER_SEQUENCE_KEY: &[u8] = b"order_sequence";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_ORDERS,
    CF_ORDER_KEYS,
    CF_WALLETS,
    CF_WALLET_TRANSACTIONS,
    CF_LEDGER_REFS,
    CF_PAYMENT_INTENTS,
    CF_META,
];

fn entry_key(user_id: UserId, entry_id: u64) -> Vec<u8> {
    let mut key = user_id.to_be_bytes().to_vec();
    key.extend_from_slice(&entry_id.to_be_bytes());
    key
}

fn reference_key(user_id: UserId, reference: &str) -> Vec<u8> {
    let mut key = user_id.to_be_bytes().to_vec();
    key.extend_from_slice(reference.as_bytes());
    key
}

/// A persistent store implementation using RocksDB.
///
/// Implements every store port over separate Column Families. Values are JSON
/// documents. Read-check-write sequences run under `write_lock`, and
/// multi-key writes go through a single `WriteBatch`, so a crash never leaves
/// a balance without its ledger entry.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating any
    /// missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EngineError::IoError(std::io::Error::other(format!(
                "{name} column family not found"
            )))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        self.db.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        let mut values = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    async fn next_id(&self) -> Result<OrderId> {
        let _guard = self.write_lock.lock().await;
        let next = self.read::<OrderId>(CF_META, ORDER_SEQUENCE_KEY)?.unwrap_or(0) + 1;
        self.write(CF_META, ORDER_SEQUENCE_KEY, &next)?;
        Ok(next)
    }

    async fn insert(&self, order: Order, idempotency_key: Option<String>) -> Result<InsertOutcome> {
        let _guard = self.write_lock.lock().await;
        if let Some(key) = &idempotency_key
            && let Some(existing_id) = self.read::<OrderId>(CF_ORDER_KEYS, key.as_bytes())?
            && let Some(existing) = self.read::<Order>(CF_ORDERS, &existing_id.to_be_bytes())?
        {
            return Ok(InsertOutcome::Existing(existing));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ORDERS)?, order.id.to_be_bytes(), serde_json::to_vec(&order)?);
        if let Some(key) = &idempotency_key {
            batch.put_cf(self.cf(CF_ORDER_KEYS)?, key.as_bytes(), serde_json::to_vec(&order.id)?);
        }
        self.db.write(batch)?;
        Ok(InsertOutcome::Inserted(order))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.read(CF_ORDERS, &id.to_be_bytes())
    }

    async fn compare_and_swap(&self, order: Order, expected_version: u64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match self.read::<Order>(CF_ORDERS, &order.id.to_be_bytes())? {
            Some(current) if current.version == expected_version => {
                self.write(CF_ORDERS, &order.id.to_be_bytes(), &order)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_customer(&self, customer_id: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = OrderStore::get_all(self)
            .await?
            .into_iter()
            .filter(|o| o.customer_id == customer_id)
            .collect();
        orders.reverse();
        Ok(orders)
    }

    async fn list_for_vendor(&self, vendor_id: UserId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = OrderStore::get_all(self)
            .await?
            .into_iter()
            .filter(|o| o.vendor_id == vendor_id)
            .collect();
        orders.reverse();
        Ok(orders)
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        // Big-endian ids iterate in creation order.
        self.scan(CF_ORDERS, &[])
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn get(&self, user_id: UserId) -> Result<Option<WalletAccount>> {
        self.read(CF_WALLETS, &user_id.to_be_bytes())
    }

    async fn open(&self, account: WalletAccount) -> Result<WalletAccount> {
        let _guard = self.write_lock.lock().await;
        let key = account.user_id.to_be_bytes();
        if let Some(existing) = self.read::<WalletAccount>(CF_WALLETS, &key)? {
            return Ok(existing);
        }
        self.write(CF_WALLETS, &key, &account)?;
        Ok(account)
    }

    async fn append(
        &self,
        account: WalletAccount,
        entry: WalletTransaction,
        expected_version: u64,
    ) -> Result<AppendOutcome> {
        let _guard = self.write_lock.lock().await;

        if let Some(reference) = &entry.reference
            && let Some(existing_key) =
                self.read::<Vec<u8>>(CF_LEDGER_REFS, &reference_key(account.user_id, reference))?
            && let Some(existing) = self.read::<WalletTransaction>(CF_WALLET_TRANSACTIONS, &existing_key)?
        {
            return Ok(AppendOutcome::Duplicate(existing));
        }

        let current_version = self
            .read::<WalletAccount>(CF_WALLETS, &account.user_id.to_be_bytes())?
            .map(|a| a.version)
            .unwrap_or(0);
        if current_version != expected_version {
            return Ok(AppendOutcome::VersionConflict);
        }

        let key = entry_key(account.user_id, entry.id);
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_WALLET_TRANSACTIONS)?,
            &key,
            serde_json::to_vec(&entry)?,
        );
        if let Some(reference) = &entry.reference {
            batch.put_cf(
                self.cf(CF_LEDGER_REFS)?,
                reference_key(account.user_id, reference),
                serde_json::to_vec(&key)?,
            );
        }
        batch.put_cf(
            self.cf(CF_WALLETS)?,
            account.user_id.to_be_bytes(),
            serde_json::to_vec(&account)?,
        );
        self.db.write(batch)?;
        Ok(AppendOutcome::Appended)
    }

    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        match self.read::<Vec<u8>>(CF_LEDGER_REFS, &reference_key(user_id, reference))? {
            Some(key) => self.read(CF_WALLET_TRANSACTIONS, &key),
            None => Ok(None),
        }
    }

    async fn transactions(&self, user_id: UserId) -> Result<Vec<WalletTransaction>> {
        self.scan(CF_WALLET_TRANSACTIONS, &user_id.to_be_bytes())
    }

    async fn get_all(&self) -> Result<Vec<WalletAccount>> {
        self.scan(CF_WALLETS, &[])
    }
}

#[async_trait]
impl PaymentIntentStore for RocksDBStore {
    async fn insert(&self, intent: PaymentIntent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = intent.gateway_order_id.as_bytes();
        if self.read::<PaymentIntent>(CF_PAYMENT_INTENTS, key)?.is_some() {
            return Err(EngineError::Conflict(format!(
                "intent {} already exists",
                intent.gateway_order_id
            )));
        }
        self.write(CF_PAYMENT_INTENTS, key, &intent)
    }

    async fn get(&self, gateway_order_id: &str) -> Result<Option<PaymentIntent>> {
        self.read(CF_PAYMENT_INTENTS, gateway_order_id.as_bytes())
    }

    async fn compare_and_swap(&self, intent: PaymentIntent, expected: &IntentStatus) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let key = intent.gateway_order_id.as_bytes().to_vec();
        match self.read::<PaymentIntent>(CF_PAYMENT_INTENTS, &key)? {
            Some(current) if &current.status == expected => {
                self.write(CF_PAYMENT_INTENTS, &key, &intent)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentIntent>> {
        let mut intents: Vec<PaymentIntent> = self
            .scan::<PaymentIntent>(CF_PAYMENT_INTENTS, &[])?
            .into_iter()
            .filter(|i| i.user_id == user_id)
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(intents)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.scan::<PaymentIntent>(CF_PAYMENT_INTENTS, &[])?.len() as u64)
    }
}
