use super::money::Amount;
use super::order::{ActorRole, Order};
use super::payment::{IntentStatus, PaymentIntent};
use super::wallet::{WalletAccount, WalletTransaction};
use super::{FoodItemId, OrderId, RestaurantId, UserId};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of inserting an order under an optional client idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Order),
    /// An order was already created with the same key.
    Existing(Order),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn next_id(&self) -> Result<OrderId>;
    async fn insert(&self, order: Order, idempotency_key: Option<String>) -> Result<InsertOutcome>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    /// Replaces the stored order only if its version still equals `expected_version`.
    async fn compare_and_swap(&self, order: Order, expected_version: u64) -> Result<bool>;
    async fn list_for_customer(&self, customer_id: UserId) -> Result<Vec<Order>>;
    async fn list_for_vendor(&self, vendor_id: UserId) -> Result<Vec<Order>>;
    async fn get_all(&self) -> Result<Vec<Order>>;
}

/// Result of a ledger append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The account moved on since it was read; re-read and retry.
    VersionConflict,
    /// An entry with the same reference exists; nothing was written.
    Duplicate(WalletTransaction),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<WalletAccount>>;
    /// Inserts `account` unless one already exists; returns the stored account.
    async fn open(&self, account: WalletAccount) -> Result<WalletAccount>;
    /// Writes the account and appends `entry` as one unit, provided the stored
    /// version equals `expected_version` and `entry.reference` is unused.
    async fn append(
        &self,
        account: WalletAccount,
        entry: WalletTransaction,
        expected_version: u64,
    ) -> Result<AppendOutcome>;
    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference: &str,
    ) -> Result<Option<WalletTransaction>>;
    /// Entries in append order.
    async fn transactions(&self, user_id: UserId) -> Result<Vec<WalletTransaction>>;
    async fn get_all(&self) -> Result<Vec<WalletAccount>>;
}

#[async_trait]
pub trait PaymentIntentStore: Send + Sync {
    /// Stores a new intent. Fails with `Conflict` if its gateway order id is already taken.
    async fn insert(&self, intent: PaymentIntent) -> Result<()>;
    async fn get(&self, gateway_order_id: &str) -> Result<Option<PaymentIntent>>;
    /// Replaces the stored intent only if its status still equals `expected`.
    async fn compare_and_swap(&self, intent: PaymentIntent, expected: &IntentStatus) -> Result<bool>;
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PaymentIntent>>;
    async fn count(&self) -> Result<u64>;
}

/// Catalog entry as seen at order time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoodItemPrice {
    pub restaurant_id: RestaurantId,
    pub price: Amount,
    pub available: bool,
}

/// Read-only view of the restaurant catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn food_item_price(&self, item_id: FoodItemId) -> Result<Option<FoodItemPrice>>;
    async fn restaurant_owner(&self, restaurant_id: RestaurantId) -> Result<Option<UserId>>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn resolve_actor_role(&self, user_id: UserId) -> Result<Option<ActorRole>>;
}

/// A gateway-side order created for an intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    Captured,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayment {
    pub id: String,
    pub order_id: String,
    pub amount_minor: i64,
    pub status: GatewayPaymentStatus,
}

/// The external payment gateway. Amounts are in minor units.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount_minor: i64, currency: &str, receipt: &str) -> Result<GatewayOrder>;
    async fn fetch_payment(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Result<GatewayPayment>;
}

pub trait OtpGenerator: Send + Sync {
    fn generate(&self, digits: usize) -> String;
}

pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PaymentIntentStoreRef = Arc<dyn PaymentIntentStore>;
pub type CatalogRef = Arc<dyn Catalog>;
pub type IdentityDirectoryRef = Arc<dyn IdentityDirectory>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type OtpGeneratorRef = Arc<dyn OtpGenerator>;
