use super::orders::{NewOrder, OrderEngine, TransitionRequest};
use super::payments::PaymentBridge;
use super::sync::{PollCursor, PollOutcome, VendorFeed, watch_order};
use super::wallet::WalletService;
use crate::config::EngineConfig;
use crate::domain::order::Order;
use crate::domain::payment::{IntentReceipt, PaymentIntent, PaymentProof, PaymentPurpose, SettlementResult};
use crate::domain::ports::{
    CatalogRef, IdentityDirectoryRef, LedgerStoreRef, OrderStoreRef, OtpGeneratorRef,
    PaymentGatewayRef, PaymentIntentStoreRef,
};
use crate::domain::money::Balance;
use crate::domain::wallet::{WalletAccount, WalletTransaction};
use crate::domain::{OrderId, UserId};
use crate::error::Result;
use crate::infrastructure::in_memory::{
    InMemoryLedgerStore, InMemoryOrderStore, InMemoryPaymentIntentStore,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Storage backends for orders, the wallet ledger and payment intents.
#[derive(Clone)]
pub struct Stores {
    pub orders: OrderStoreRef,
    pub ledger: LedgerStoreRef,
    pub intents: PaymentIntentStoreRef,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            intents: Arc::new(InMemoryPaymentIntentStore::new()),
        }
    }
}

/// External systems the engine consults but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: CatalogRef,
    pub identity: IdentityDirectoryRef,
    pub gateway: PaymentGatewayRef,
    pub otp: OtpGeneratorRef,
}

/// The main entry point for the settlement core.
///
/// `SettlementEngine` wires the wallet, order engine and payment bridge over
/// one set of stores and exposes every boundary operation. It is cheap to
/// clone; clones share state.
#[derive(Clone)]
pub struct SettlementEngine {
    config: EngineConfig,
    wallet: WalletService,
    orders: OrderEngine,
    payments: PaymentBridge,
}

impl SettlementEngine {
    /// Creates a new `SettlementEngine` instance.
    ///
    /// # Arguments
    ///
    /// * `stores` - Backends for orders, the wallet ledger and payment intents.
    /// * `collaborators` - Catalog, identity directory, payment gateway and OTP source.
    /// * `config` - Tax rate, wallet limit, retry and timeout settings.
    pub fn new(stores: Stores, collaborators: Collaborators, config: EngineConfig) -> Self {
        let wallet = WalletService::new(stores.ledger, &config);
        let orders = OrderEngine::new(
            stores.orders,
            collaborators.catalog,
            collaborators.identity,
            collaborators.otp,
            wallet.clone(),
            &config,
        );
        let payments = PaymentBridge::new(
            stores.intents,
            collaborators.gateway,
            orders.clone(),
            wallet.clone(),
            &config,
        );
        Self {
            config,
            wallet,
            orders,
            payments,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn wallet(&self) -> &WalletService {
        &self.wallet
    }

    pub fn orders(&self) -> &OrderEngine {
        &self.orders
    }

    pub fn payments(&self) -> &PaymentBridge {
        &self.payments
    }

    /// Places a `PENDING` order with prices frozen from the catalog.
    ///
    /// A repeated request carrying the same idempotency key returns the order
    /// created first.
    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        self.orders.create_order(request).await
    }

    /// Moves an order to `request.target` on behalf of its customer or vendor.
    ///
    /// Requesting the current status is a no-op. Cancelling a paid order
    /// refunds the settled amount to the customer's wallet exactly once.
    ///
    /// # Arguments
    ///
    /// * `request` - Order, acting user, target status, and the OTP or
    ///   delivery agent when the target needs one.
    pub async fn transition_order(&self, request: TransitionRequest) -> Result<Order> {
        self.orders.transition_order(request).await
    }

    /// Reads an order as seen by `viewer_id`; only the customer sees the OTP.
    pub async fn get_order(&self, order_id: OrderId, viewer_id: UserId) -> Result<Order> {
        self.orders.get_order(order_id, viewer_id).await
    }

    /// Orders placed by a customer, newest first.
    pub async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.orders.list_orders_for_user(user_id).await
    }

    pub async fn list_orders_for_vendor(&self, vendor_id: UserId) -> Result<Vec<Order>> {
        self.orders.list_orders_for_vendor(vendor_id).await
    }

    /// Settles an unpaid order from the customer's wallet.
    ///
    /// The debit is keyed `ORDER_<id>`, so repeated or concurrent calls charge
    /// at most once. An order that is already paid is returned unchanged.
    ///
    /// # Arguments
    ///
    /// * `order_id` - The order to settle.
    /// * `user_id` - Must be the order's customer.
    pub async fn pay_order_from_wallet(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        self.orders.pay_with_wallet(order_id, user_id).await
    }

    pub async fn wallet_balance(&self, user_id: UserId) -> Result<Balance> {
        self.wallet.balance(user_id).await
    }

    /// Ledger entries for a wallet, newest first.
    pub async fn wallet_transactions(&self, user_id: UserId) -> Result<Vec<WalletTransaction>> {
        self.wallet.transactions(user_id).await
    }

    /// Adds funds to a wallet, refusing to grow past the configured maximum.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the wallet; the wallet is opened on first use.
    /// * `amount` - Strictly positive amount to add.
    /// * `description` - Free text stored on the ledger entry.
    /// * `order_id` - Order the entry relates to, if any.
    pub async fn credit_wallet(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        order_id: Option<OrderId>,
    ) -> Result<WalletTransaction> {
        self.wallet.credit(user_id, amount, description, order_id).await
    }

    /// Removes funds from a wallet. Fails with `InsufficientBalance` and
    /// writes nothing if the balance does not cover `amount`.
    pub async fn debit_wallet(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        order_id: Option<OrderId>,
    ) -> Result<WalletTransaction> {
        self.wallet.debit(user_id, amount, description, order_id).await
    }

    /// Opens a gateway order and records a `Created` intent. No money moves
    /// until the intent is confirmed.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The paying customer.
    /// * `amount` - Must equal the order total for an order payment.
    /// * `purpose` - A wallet top-up or the payment of one order.
    pub async fn create_payment_intent(
        &self,
        user_id: UserId,
        amount: Decimal,
        purpose: PaymentPurpose,
    ) -> Result<IntentReceipt> {
        self.payments.create_intent(user_id, amount, purpose).await
    }

    /// Applies a captured gateway payment to its intent, exactly once.
    ///
    /// Replaying the same proof returns [`SettlementResult::AlreadyConfirmed`]
    /// without touching any balance.
    pub async fn confirm_payment(&self, proof: PaymentProof) -> Result<SettlementResult> {
        self.payments.confirm_payment(proof).await
    }

    /// Marks an open intent as failed.
    pub async fn fail_payment(&self, gateway_order_id: &str, reason: &str) -> Result<PaymentIntent> {
        self.payments.fail_payment(gateway_order_id, reason).await
    }

    pub async fn get_payment_intent(&self, gateway_order_id: &str) -> Result<PaymentIntent> {
        self.payments.get_intent(gateway_order_id).await
    }

    /// Returns the order only if its version moved past `cursor`.
    ///
    /// # Arguments
    ///
    /// * `order_id` - The watched order.
    /// * `viewer_id` - Its customer or vendor.
    /// * `cursor` - Last version seen by this poller; advanced on change.
    pub async fn poll_order(
        &self,
        order_id: OrderId,
        viewer_id: UserId,
        cursor: &mut PollCursor,
    ) -> Result<PollOutcome> {
        self.orders.poll_order(order_id, viewer_id, cursor).await
    }

    /// New or changed orders for a vendor since the previous poll with `feed`.
    pub async fn poll_vendor_orders(&self, vendor_id: UserId, feed: &mut VendorFeed) -> Result<Vec<Order>> {
        self.orders.poll_vendor_orders(vendor_id, feed).await
    }

    /// Watches an order at the configured cadence: the customer interval for
    /// the customer, the vendor interval for the vendor.
    pub async fn watch_order(
        &self,
        order_id: OrderId,
        viewer_id: UserId,
    ) -> Result<(mpsc::Receiver<Order>, JoinHandle<()>)> {
        let order = self.orders.get_order(order_id, viewer_id).await?;
        let interval = if viewer_id == order.customer_id {
            self.config.customer_poll_interval
        } else {
            self.config.vendor_poll_interval
        };
        Ok(watch_order(self.orders.clone(), order_id, viewer_id, interval))
    }

    /// Final state of every wallet, by user id.
    pub async fn wallet_snapshot(&self) -> Result<Vec<WalletAccount>> {
        self.wallet.accounts().await
    }

    /// Final state of every order, by order id.
    pub async fn order_snapshot(&self) -> Result<Vec<Order>> {
        self.orders.all_orders().await
    }
}
