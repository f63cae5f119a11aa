use crate::domain::ports::{
    AppendOutcome, InsertOutcome, LedgerStore, OrderStore, PaymentIntentStore,
};
use crate::domain::order::Order;
use crate::domain::payment::{IntentStatus, PaymentIntent};
use crate::domain::wallet::{WalletAccount, WalletTransaction};
use crate::domain::{OrderId, UserId};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    orders
}

#[derive(Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    idempotency_keys: HashMap<String, OrderId>,
}

/// A thread-safe in-memory order store.
///
/// Every write takes the table's write lock, which is what makes
/// `compare_and_swap` and keyed inserts atomic.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn next_id(&self) -> Result<OrderId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, order: Order, idempotency_key: Option<String>) -> Result<InsertOutcome> {
        let mut table = self.table.write().await;
        if let Some(key) = &idempotency_key
            && let Some(existing) = table.idempotency_keys.get(key).and_then(|id| table.orders.get(id))
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if let Some(key) = idempotency_key {
            table.idempotency_keys.insert(key, order.id);
        }
        table.orders.insert(order.id, order.clone());
        Ok(InsertOutcome::Inserted(order))
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let table = self.table.read().await;
        Ok(table.orders.get(&id).cloned())
    }

    async fn compare_and_swap(&self, order: Order, expected_version: u64) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.orders.get_mut(&order.id) {
            Some(current) if current.version == expected_version => {
                *current = order;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_customer(&self, customer_id: UserId) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        Ok(newest_first(
            table
                .orders
                .values()
                .filter(|o| o.customer_id == customer_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_for_vendor(&self, vendor_id: UserId) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        Ok(newest_first(
            table
                .orders
                .values()
                .filter(|o| o.vendor_id == vendor_id)
                .cloned()
                .collect(),
        ))
    }

    async fn get_all(&self) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        let mut orders: Vec<Order> = table.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}

#[derive(Default)]
struct Ledger {
    accounts: HashMap<UserId, WalletAccount>,
    entries: HashMap<UserId, Vec<WalletTransaction>>,
}

/// A thread-safe in-memory wallet ledger.
///
/// Accounts and their entries live behind one lock so a balance write and
/// its ledger entry can never be observed apart.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, user_id: UserId) -> Result<Option<WalletAccount>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.accounts.get(&user_id).cloned())
    }

    async fn open(&self, account: WalletAccount) -> Result<WalletAccount> {
        let mut ledger = self.ledger.write().await;
        Ok(ledger
            .accounts
            .entry(account.user_id)
            .or_insert(account)
            .clone())
    }

    async fn append(
        &self,
        account: WalletAccount,
        entry: WalletTransaction,
        expected_version: u64,
    ) -> Result<AppendOutcome> {
        let mut ledger = self.ledger.write().await;
        let Ledger { accounts, entries } = &mut *ledger;
        let history = entries.entry(account.user_id).or_default();

        if let Some(reference) = &entry.reference
            && let Some(existing) = history
                .iter()
                .find(|e| e.reference.as_ref() == Some(reference))
        {
            return Ok(AppendOutcome::Duplicate(existing.clone()));
        }

        let current_version = accounts.get(&account.user_id).map(|a| a.version).unwrap_or(0);
        if current_version != expected_version {
            return Ok(AppendOutcome::VersionConflict);
        }

        history.push(entry);
        accounts.insert(account.user_id, account);
        Ok(AppendOutcome::Appended)
    }

    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<WalletTransaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.entries.get(&user_id).and_then(|history| {
            history
                .iter()
                .find(|e| e.reference.as_deref() == Some(reference))
                .cloned()
        }))
    }

    async fn transactions(&self, user_id: UserId) -> Result<Vec<WalletTransaction>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.entries.get(&user_id).cloned().unwrap_or_default())
    }

    async fn get_all(&self) -> Result<Vec<WalletAccount>> {
        let ledger = self.ledger.read().await;
        let mut accounts: Vec<WalletAccount> = ledger.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.user_id);
        Ok(accounts)
    }
}

/// A thread-safe in-memory store for payment intents, keyed by gateway order id.
#[derive(Default, Clone)]
pub struct InMemoryPaymentIntentStore {
    intents: Arc<RwLock<HashMap<String, PaymentIntent>>>,
}

impl InMemoryPaymentIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentIntentStore for InMemoryPaymentIntentStore {
    async fn insert(&self, intent: PaymentIntent) -> Result<()> {
        let mut intents = self.intents.write().await;
        if intents.contains_key(&intent.gateway_order_id) {
            return Err(EngineError::Conflict(format!(
                "intent {} already exists",
                intent.gateway_order_id
            )));
        }
        intents.insert(intent.gateway_order_id.clone(), intent);
        Ok(())
    }

    async fn get(&self, gateway_order_id: &str) -> Result<Option<PaymentIntent>> {
        let intents = self.intents.read().await;
        Ok(intents.get(gateway_order_id).cloned())
    }

    async fn compare_and_swap(&self, intent: PaymentIntent, expected: &IntentStatus) -> Result<bool> {
        let mut intents = self.intents.write().await;
        match intents.get_mut(&intent.gateway_order_id) {
            Some(current) if &current.status == expected => {
                *current = intent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentIntent>> {
        let intents = self.intents.read().await;
        let mut found: Vec<PaymentIntent> = intents
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.intents.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::order::{DeliveryInfo, LineItem, OrderDraft};
    use crate::domain::payment::PaymentPurpose;
    use crate::domain::wallet::{Posting, TransactionKind};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: OrderId, customer_id: UserId) -> Order {
        Order::new(
            id,
            OrderDraft {
                customer_id,
                vendor_id: 2,
                restaurant_id: 10,
                train_id: 12951,
                delivery: DeliveryInfo {
                    pnr: "4521367890".to_string(),
                    coach: "B2".to_string(),
                    seat: "34".to_string(),
                    instructions: None,
                },
                items: vec![LineItem {
                    food_item_id: 100,
                    quantity: 1,
                    unit_price: dec!(100),
                }],
            },
            dec!(0.05),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_order_store() {
        let store = InMemoryOrderStore::new();
        let id = store.next_id().await.unwrap();
        assert_eq!(id, 1);

        let order = order(id, 1);
        store.insert(order.clone(), None).await.unwrap();
        let retrieved = store.get(id).await.unwrap().unwrap();
        assert_eq!(retrieved, order);

        assert!(store.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_order_idempotency_key() {
        let store = InMemoryOrderStore::new();
        let first = order(1, 1);
        let retry = order(2, 1);

        let outcome = store.insert(first.clone(), Some("k1".to_string())).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted(first.clone()));
        let outcome = store.insert(retry, Some("k1".to_string())).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Existing(first));
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_compare_and_swap() {
        let store = InMemoryOrderStore::new();
        let original = order(1, 1);
        store.insert(original.clone(), None).await.unwrap();

        let mut updated = original.clone();
        updated.version = 2;
        assert!(store.compare_and_swap(updated.clone(), 1).await.unwrap());
        // Stale writer loses.
        assert!(!store.compare_and_swap(original, 1).await.unwrap());
        assert_eq!(store.get(1).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_order_listings() {
        let store = InMemoryOrderStore::new();
        store.insert(order(1, 1), None).await.unwrap();
        store.insert(order(2, 1), None).await.unwrap();
        store.insert(order(3, 5), None).await.unwrap();

        let mine = store.list_for_customer(1).await.unwrap();
        assert_eq!(mine.iter().map(|o| o.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(store.list_for_vendor(2).await.unwrap().len(), 3);
        assert!(store.list_for_vendor(9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_append_and_duplicates() {
        let store = InMemoryLedgerStore::new();
        let opened = store.open(WalletAccount::new(1, Utc::now())).await.unwrap();
        assert_eq!(opened.balance, Balance::ZERO);

        let mut account = opened.clone();
        let entry = Posting::new(
            TransactionKind::Credit,
            Amount::new(dec!(100)).unwrap(),
            "Top-up",
        )
        .with_reference("pay_1")
        .apply(&mut account, None, Utc::now())
        .unwrap();

        let outcome = store.append(account.clone(), entry.clone(), 0).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Appended);

        let replay = store.append(account.clone(), entry.clone(), 1).await.unwrap();
        assert_eq!(replay, AppendOutcome::Duplicate(entry.clone()));

        let mut stale = entry.clone();
        stale.reference = Some("pay_2".to_string());
        let conflict = store.append(account, stale, 0).await.unwrap();
        assert_eq!(conflict, AppendOutcome::VersionConflict);

        assert_eq!(store.transactions(1).await.unwrap(), vec![entry.clone()]);
        assert_eq!(
            store.find_by_reference(1, "pay_1").await.unwrap(),
            Some(entry)
        );
        assert_eq!(
            store.get(1).await.unwrap().unwrap().balance,
            Balance::new(dec!(100))
        );
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = InMemoryLedgerStore::new();
        let first = store.open(WalletAccount::new(1, Utc::now())).await.unwrap();
        let second = store.open(WalletAccount::new(1, Utc::now())).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_intent_compare_and_swap() {
        let store = InMemoryPaymentIntentStore::new();
        let intent = PaymentIntent {
            gateway_order_id: "order_1".to_string(),
            receipt: "wallet_topup_1_1".to_string(),
            user_id: 1,
            purpose: PaymentPurpose::WalletTopUp,
            amount: Amount::new(dec!(100)).unwrap(),
            amount_minor: 10000,
            currency: "INR".to_string(),
            status: IntentStatus::Created,
            created_at: Utc::now(),
            resolved_at: None,
        };
        store.insert(intent.clone()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let mut confirmed = intent.clone();
        confirmed.status = IntentStatus::Confirmed {
            gateway_payment_id: "pay_1".to_string(),
        };
        assert!(
            store
                .compare_and_swap(confirmed.clone(), &IntentStatus::Created)
                .await
                .unwrap()
        );
        assert!(
            !store
                .compare_and_swap(confirmed.clone(), &IntentStatus::Created)
                .await
                .unwrap()
        );
        assert_eq!(store.list_for_user(1).await.unwrap().len(), 1);

        // A resolved intent is never replaced by a new one under the same id.
        assert!(matches!(
            store.insert(intent).await,
            Err(EngineError::Conflict(_))
        ));
        assert_eq!(store.get("order_1").await.unwrap(), Some(confirmed));
    }
}
