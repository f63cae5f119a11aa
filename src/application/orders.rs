use super::wallet::{WalletService, order_payment_reference};
use crate::config::EngineConfig;
use crate::domain::money::Amount;
use crate::domain::order::{
    ActorRole, DeliveryAgent, DeliveryInfo, LineItem, Order, OrderDraft, OrderStatus,
    PaymentMethod, PaymentState, SettleOutcome, Settlement, TransitionEffect,
};
use crate::domain::ports::{
    CatalogRef, IdentityDirectoryRef, InsertOutcome, OrderStoreRef, OtpGeneratorRef,
};
use crate::domain::wallet::{Posting, TransactionKind};
use crate::domain::{FoodItemId, OrderId, RestaurantId, TrainId, UserId};
use crate::error::{EngineError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderLine {
    pub food_item_id: FoodItemId,
    pub quantity: u32,
}

/// A customer's request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewOrder {
    pub customer_id: UserId,
    pub restaurant_id: RestaurantId,
    pub train_id: TrainId,
    pub delivery: DeliveryInfo,
    pub items: Vec<OrderLine>,
    /// Client-chosen key; resubmitting with the same key returns the first order.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub order_id: OrderId,
    pub actor_id: UserId,
    pub target: OrderStatus,
    pub otp: Option<String>,
    pub delivery_agent: Option<DeliveryAgent>,
}

impl TransitionRequest {
    pub fn new(order_id: OrderId, actor_id: UserId, target: OrderStatus) -> Self {
        Self {
            order_id,
            actor_id,
            target,
            otp: None,
            delivery_agent: None,
        }
    }

    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }

    pub fn with_agent(mut self, agent: DeliveryAgent) -> Self {
        self.delivery_agent = Some(agent);
        self
    }
}

/// Owns the order lifecycle.
///
/// Every write is a compare-and-swap on the order's version, so two racing
/// transitions on one order cannot both commit.
#[derive(Clone)]
pub struct OrderEngine {
    orders: OrderStoreRef,
    catalog: CatalogRef,
    identity: IdentityDirectoryRef,
    otp: OtpGeneratorRef,
    wallet: WalletService,
    tax_rate: Decimal,
    otp_digits: usize,
    max_retries: usize,
}

impl OrderEngine {
    pub fn new(
        orders: OrderStoreRef,
        catalog: CatalogRef,
        identity: IdentityDirectoryRef,
        otp: OtpGeneratorRef,
        wallet: WalletService,
        config: &EngineConfig,
    ) -> Self {
        Self {
            orders,
            catalog,
            identity,
            otp,
            wallet,
            tax_rate: config.tax_rate,
            otp_digits: config.otp_len(),
            max_retries: config.max_write_retries,
        }
    }

    /// Validates the request, snapshots current catalog prices and persists a
    /// `PENDING` order.
    #[instrument(skip(self, request), fields(customer_id = request.customer_id, restaurant_id = request.restaurant_id))]
    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        if self.role_of(request.customer_id).await? != ActorRole::Customer {
            return Err(EngineError::Forbidden(format!(
                "user {} cannot place orders",
                request.customer_id
            )));
        }
        request.delivery.validate()?;
        if request.items.is_empty() {
            return Err(EngineError::Validation("order has no items".to_string()));
        }

        let vendor_id = self
            .catalog
            .restaurant_owner(request.restaurant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("restaurant {}", request.restaurant_id)))?;

        let mut items = Vec::with_capacity(request.items.len());
        for line in &request.items {
            if line.quantity == 0 {
                return Err(EngineError::Validation(format!(
                    "quantity for item {} must be at least 1",
                    line.food_item_id
                )));
            }
            let price = self
                .catalog
                .food_item_price(line.food_item_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("food item {}", line.food_item_id)))?;
            if price.restaurant_id != request.restaurant_id {
                return Err(EngineError::Validation(format!(
                    "food item {} is not served by restaurant {}",
                    line.food_item_id, request.restaurant_id
                )));
            }
            if !price.available {
                return Err(EngineError::Validation(format!(
                    "food item {} is unavailable",
                    line.food_item_id
                )));
            }
            items.push(LineItem {
                food_item_id: line.food_item_id,
                quantity: line.quantity,
                unit_price: price.price.value(),
            });
        }

        let id = self.orders.next_id().await?;
        let draft = OrderDraft {
            customer_id: request.customer_id,
            vendor_id,
            restaurant_id: request.restaurant_id,
            train_id: request.train_id,
            delivery: request.delivery,
            items,
        };
        let order = Order::new(id, draft, self.tax_rate, Utc::now())?;

        match self.orders.insert(order, request.idempotency_key).await? {
            InsertOutcome::Inserted(order) => {
                info!(order_id = order.id, total = %order.total, "Order created");
                Ok(order)
            }
            InsertOutcome::Existing(order) => {
                debug!(order_id = order.id, "Duplicate create absorbed");
                Ok(order)
            }
        }
    }

    /// Reads an order on behalf of its customer or vendor.
    pub async fn get_order(&self, order_id: OrderId, viewer_id: UserId) -> Result<Order> {
        let order = self.load(order_id).await?;
        if viewer_id != order.customer_id && viewer_id != order.vendor_id {
            return Err(EngineError::Forbidden(format!(
                "user {viewer_id} cannot view order {order_id}"
            )));
        }
        Ok(order.redacted_for(viewer_id))
    }

    pub async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .list_for_customer(user_id)
            .await?
            .iter()
            .map(|o| o.redacted_for(user_id))
            .collect())
    }

    pub async fn list_orders_for_vendor(&self, vendor_id: UserId) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .list_for_vendor(vendor_id)
            .await?
            .iter()
            .map(|o| o.redacted_for(vendor_id))
            .collect())
    }

    /// Moves an order to `request.target`.
    ///
    /// Requesting the status the order is already in is a successful no-op.
    /// A cancellation of a settled order refunds the settled amount to the
    /// customer's wallet; the order's `Refunded` marker and the ledger's
    /// reference check together make that refund happen once.
    #[instrument(skip(self, request), fields(order_id = request.order_id, actor_id = request.actor_id, target = %request.target))]
    pub async fn transition_order(&self, request: TransitionRequest) -> Result<Order> {
        let role = self.role_of(request.actor_id).await?;

        for attempt in 0..=self.max_retries {
            let current = self.load(request.order_id).await?;
            current.authorize(request.actor_id, role)?;

            if current.status == request.target {
                if let PaymentState::Refunded(settlement) = &current.payment {
                    // Finishes a refund interrupted after the status write.
                    self.wallet
                        .refund_order(current.customer_id, current.id, settlement.amount)
                        .await?;
                }
                debug!("Order already in requested status");
                return Ok(current.redacted_for(request.actor_id));
            }

            let mut next = current.clone();
            let effect = next
                .apply_transition(
                    request.target,
                    role,
                    request.otp.as_deref(),
                    request.delivery_agent.clone(),
                    || self.otp.generate(self.otp_digits),
                    Utc::now(),
                )
                .inspect_err(|err| warn!(from = %current.status, %role, error = %err, "Transition rejected"))?;

            if !self.orders.compare_and_swap(next.clone(), current.version).await? {
                debug!(attempt, "Order version conflict, retrying");
                continue;
            }
            info!(from = %current.status, to = %next.status, %role, "Order transitioned");

            if let TransitionEffect::Refund(settlement) = effect {
                self.wallet
                    .refund_order(next.customer_id, next.id, settlement.amount)
                    .await?;
            }
            return Ok(next.redacted_for(request.actor_id));
        }
        Err(EngineError::Conflict(format!(
            "order {} kept changing during transition",
            request.order_id
        )))
    }

    /// Pays the order total from the customer's wallet and marks the order settled.
    ///
    /// Safe to resubmit: the debit is keyed on the order, and an already
    /// settled order is returned as is.
    #[instrument(skip(self))]
    pub async fn pay_with_wallet(&self, order_id: OrderId, user_id: UserId) -> Result<Order> {
        let order = self.load(order_id).await?;
        order.authorize(user_id, ActorRole::Customer)?;
        match &order.payment {
            PaymentState::Paid(_) => return Ok(order.redacted_for(user_id)),
            PaymentState::Refunded(_) => {
                return Err(EngineError::Validation(format!(
                    "order {order_id} was already refunded"
                )));
            }
            PaymentState::Unpaid => {}
        }
        if order.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "order {order_id} is {} and cannot be paid",
                order.status
            )));
        }

        let reference = order_payment_reference(order_id);
        let posting = Posting::new(
            TransactionKind::Debit,
            Amount::new(order.total)?,
            format!("Payment for order #{order_id}"),
        )
        .for_order(Some(order_id))
        .with_reference(reference.clone());
        self.wallet.post_once(user_id, posting).await?;

        let settlement = Settlement {
            method: PaymentMethod::Wallet,
            amount: order.total,
            reference: reference.clone(),
            settled_at: Utc::now(),
        };
        let (order, outcome) = self.settle(order_id, settlement).await?;
        match outcome {
            SettleOutcome::Settled => Ok(order.redacted_for(user_id)),
            // A concurrent submit of this same payment won.
            _ if settled_by(&order, &reference) => Ok(order.redacted_for(user_id)),
            SettleOutcome::AlreadySettled | SettleOutcome::Closed => {
                // The debit did not pay for anything; hand it back.
                self.wallet
                    .return_payment(user_id, order_id, order.total, &reference)
                    .await?;
                Err(EngineError::Validation(format!(
                    "order {order_id} was settled or closed concurrently; payment returned to wallet"
                )))
            }
        }
    }

    /// Marks an order paid. Returns the order as stored after the attempt.
    pub async fn settle(&self, order_id: OrderId, settlement: Settlement) -> Result<(Order, SettleOutcome)> {
        for attempt in 0..=self.max_retries {
            let current = self.load(order_id).await?;
            let mut next = current.clone();
            let outcome = next.settle(settlement.clone(), Utc::now());
            if outcome != SettleOutcome::Settled {
                return Ok((current, outcome));
            }
            if self.orders.compare_and_swap(next.clone(), current.version).await? {
                info!(order_id, method = ?settlement.method, amount = %settlement.amount, "Order payment settled");
                return Ok((next, outcome));
            }
            debug!(order_id, attempt, "Order version conflict during settlement, retrying");
        }
        Err(EngineError::Conflict(format!(
            "order {order_id} kept changing during settlement"
        )))
    }

    /// Raw read without viewer checks, for collaborating services.
    pub async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }

    pub async fn all_orders(&self) -> Result<Vec<Order>> {
        self.orders.get_all().await
    }

    async fn role_of(&self, user_id: UserId) -> Result<ActorRole> {
        self.identity
            .resolve_actor_role(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("user {user_id}")))
    }
}

/// True when the order's settlement came from the payment identified by `reference`.
pub fn settled_by(order: &Order, reference: &str) -> bool {
    matches!(&order.payment, PaymentState::Paid(s) | PaymentState::Refunded(s) if s.reference == reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::infrastructure::directory::{StaticCatalog, StaticDirectory};
    use crate::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryOrderStore};
    use crate::infrastructure::otp::FixedOtp;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const CUSTOMER: UserId = 1;
    const VENDOR: UserId = 2;
    const STRANGER: UserId = 3;

    async fn engine() -> (OrderEngine, WalletService, StaticCatalog) {
        let config = EngineConfig::default();
        let catalog = StaticCatalog::new();
        catalog.add_restaurant(10, VENDOR).await;
        catalog
            .set_item(100, 10, Amount::new(dec!(100)).unwrap(), true)
            .await;
        catalog
            .set_item(101, 10, Amount::new(dec!(50)).unwrap(), true)
            .await;
        catalog
            .set_item(102, 10, Amount::new(dec!(80)).unwrap(), false)
            .await;

        let directory = StaticDirectory::new();
        directory.register(CUSTOMER, ActorRole::Customer).await;
        directory.register(VENDOR, ActorRole::Vendor).await;
        directory.register(STRANGER, ActorRole::Customer).await;

        let wallet = WalletService::new(Arc::new(InMemoryLedgerStore::new()), &config);
        let engine = OrderEngine::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(catalog.clone()),
            Arc::new(directory),
            Arc::new(FixedOtp("4821".to_string())),
            wallet.clone(),
            &config,
        );
        (engine, wallet, catalog)
    }

    fn new_order() -> NewOrder {
        NewOrder {
            customer_id: CUSTOMER,
            restaurant_id: 10,
            train_id: 12951,
            delivery: DeliveryInfo {
                pnr: "4521367890".to_string(),
                coach: "B2".to_string(),
                seat: "34".to_string(),
                instructions: Some("Call on arrival".to_string()),
            },
            items: vec![
                OrderLine {
                    food_item_id: 100,
                    quantity: 1,
                },
                OrderLine {
                    food_item_id: 101,
                    quantity: 2,
                },
            ],
            idempotency_key: None,
        }
    }

    async fn advance(engine: &OrderEngine, order_id: OrderId, target: OrderStatus) -> Result<Order> {
        engine
            .transition_order(TransitionRequest::new(order_id, VENDOR, target))
            .await
    }

    #[tokio::test]
    async fn test_create_snapshots_prices() {
        let (engine, _, catalog) = engine().await;
        let order = engine.create_order(new_order()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total, dec!(210));
        assert_eq!(order.vendor_id, VENDOR);

        catalog
            .set_item(100, 10, Amount::new(dec!(999)).unwrap(), true)
            .await;
        let reread = engine.get_order(order.id, CUSTOMER).await.unwrap();
        assert_eq!(reread.total, dec!(210));
        assert_eq!(reread.items[0].unit_price, dec!(100));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (engine, _, _) = engine().await;

        let mut missing_pnr = new_order();
        missing_pnr.delivery.pnr = String::new();
        assert!(matches!(
            engine.create_order(missing_pnr).await,
            Err(EngineError::Validation(_))
        ));

        let mut unavailable = new_order();
        unavailable.items.push(OrderLine {
            food_item_id: 102,
            quantity: 1,
        });
        assert!(matches!(
            engine.create_order(unavailable).await,
            Err(EngineError::Validation(_))
        ));

        let mut unknown = new_order();
        unknown.items[0].food_item_id = 999;
        assert!(matches!(
            engine.create_order(unknown).await,
            Err(EngineError::NotFound(_))
        ));

        let mut by_vendor = new_order();
        by_vendor.customer_id = VENDOR;
        assert!(matches!(
            engine.create_order(by_vendor).await,
            Err(EngineError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_create_returns_first_order() {
        let (engine, _, _) = engine().await;
        let mut request = new_order();
        request.idempotency_key = Some("cart-42".to_string());

        let first = engine.create_order(request.clone()).await.unwrap();
        let second = engine.create_order(request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.list_orders_for_user(CUSTOMER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_with_otp() {
        let (engine, _, _) = engine().await;
        let order = engine.create_order(new_order()).await.unwrap();

        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
        ] {
            advance(&engine, order.id, status).await.unwrap();
        }
        let dispatched = engine
            .transition_order(
                TransitionRequest::new(order.id, VENDOR, OrderStatus::OutForDelivery).with_agent(
                    DeliveryAgent {
                        name: "Ravi".to_string(),
                        phone: "9876543210".to_string(),
                    },
                ),
            )
            .await
            .unwrap();
        // The vendor never sees the code.
        assert!(dispatched.delivery_otp.is_none());
        assert!(dispatched.delivery_agent.is_some());

        let customer_view = engine.get_order(order.id, CUSTOMER).await.unwrap();
        assert_eq!(customer_view.delivery_otp.as_deref(), Some("4821"));

        let wrong = engine
            .transition_order(
                TransitionRequest::new(order.id, VENDOR, OrderStatus::Delivered).with_otp("0000"),
            )
            .await;
        assert!(matches!(wrong, Err(EngineError::OtpMismatch)));
        assert_eq!(
            engine.get_order(order.id, VENDOR).await.unwrap().status,
            OrderStatus::OutForDelivery
        );

        let delivered = engine
            .transition_order(
                TransitionRequest::new(order.id, VENDOR, OrderStatus::Delivered).with_otp("4821"),
            )
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(engine.load(order.id).await.unwrap().delivery_otp.is_none());
    }

    #[tokio::test]
    async fn test_same_status_is_noop() {
        let (engine, _, _) = engine().await;
        let order = engine.create_order(new_order()).await.unwrap();
        let first = advance(&engine, order.id, OrderStatus::Confirmed).await.unwrap();
        let second = advance(&engine, order.id, OrderStatus::Confirmed).await.unwrap();
        let third = advance(&engine, order.id, OrderStatus::Confirmed).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let (engine, _, _) = engine().await;
        let order = engine.create_order(new_order()).await.unwrap();

        let stranger_cancel = engine
            .transition_order(TransitionRequest::new(
                order.id,
                STRANGER,
                OrderStatus::Cancelled,
            ))
            .await;
        assert!(matches!(stranger_cancel, Err(EngineError::Forbidden(_))));
        assert!(matches!(
            engine.get_order(order.id, STRANGER).await,
            Err(EngineError::Forbidden(_))
        ));

        let customer_confirm = engine
            .transition_order(TransitionRequest::new(
                order.id,
                CUSTOMER,
                OrderStatus::Confirmed,
            ))
            .await;
        assert!(matches!(
            customer_confirm,
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            engine.get_order(42, CUSTOMER).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wallet_payment_and_refund_once() {
        let (engine, wallet, _) = engine().await;
        wallet.credit(CUSTOMER, dec!(500), "Top-up", None).await.unwrap();
        let order = engine.create_order(new_order()).await.unwrap();

        let paid = engine.pay_with_wallet(order.id, CUSTOMER).await.unwrap();
        assert!(paid.payment.is_settled());
        // Double submit.
        engine.pay_with_wallet(order.id, CUSTOMER).await.unwrap();
        assert_eq!(wallet.balance(CUSTOMER).await.unwrap(), Balance::new(dec!(290)));

        advance(&engine, order.id, OrderStatus::Confirmed).await.unwrap();
        let cancel = TransitionRequest::new(order.id, CUSTOMER, OrderStatus::Cancelled);
        engine.transition_order(cancel.clone()).await.unwrap();
        engine.transition_order(cancel).await.unwrap();

        assert_eq!(wallet.balance(CUSTOMER).await.unwrap(), Balance::new(dec!(500)));
        let refunds = wallet
            .transactions(CUSTOMER)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Refund)
            .count();
        assert_eq!(refunds, 1);
    }

    #[tokio::test]
    async fn test_wallet_payment_insufficient() {
        let (engine, wallet, _) = engine().await;
        wallet.credit(CUSTOMER, dec!(50), "Top-up", None).await.unwrap();
        let order = engine.create_order(new_order()).await.unwrap();

        let result = engine.pay_with_wallet(order.id, CUSTOMER).await;
        assert!(matches!(result, Err(EngineError::InsufficientBalance { .. })));
        assert_eq!(wallet.balance(CUSTOMER).await.unwrap(), Balance::new(dec!(50)));
        assert_eq!(wallet.transactions(CUSTOMER).await.unwrap().len(), 1);
        assert_eq!(engine.load(order.id).await.unwrap().payment, PaymentState::Unpaid);
    }

    #[tokio::test]
    async fn test_cancel_unpaid_order_moves_no_money() {
        let (engine, wallet, _) = engine().await;
        let order = engine.create_order(new_order()).await.unwrap();
        engine
            .transition_order(TransitionRequest::new(
                order.id,
                CUSTOMER,
                OrderStatus::Cancelled,
            ))
            .await
            .unwrap();
        assert!(wallet.transactions(CUSTOMER).await.unwrap().is_empty());
        assert!(matches!(
            engine.pay_with_wallet(order.id, CUSTOMER).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_vendor_listing_redacts_otp() {
        let (engine, _, _) = engine().await;
        let order = engine.create_order(new_order()).await.unwrap();
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::OutForDelivery,
        ] {
            advance(&engine, order.id, status).await.unwrap();
        }
        let listed = engine.list_orders_for_vendor(VENDOR).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].delivery_otp.is_none());
        let mine = engine.list_orders_for_user(CUSTOMER).await.unwrap();
        assert_eq!(mine[0].delivery_otp.as_deref(), Some("4821"));
    }
}
