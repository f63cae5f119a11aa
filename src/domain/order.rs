use super::{FoodItemId, OrderId, RestaurantId, TrainId, UserId};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fulfillment states of an order, in the only order they may be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// The single forward step out of this status, if any.
    pub fn successor(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Preparing),
            OrderStatus::Preparing => Some(OrderStatus::Ready),
            OrderStatus::Ready => Some(OrderStatus::OutForDelivery),
            OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::Ready => "READY",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role an actor plays for a transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Vendor,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Customer => f.write_str("customer"),
            ActorRole::Vendor => f.write_str("vendor"),
        }
    }
}

/// Where aboard the train the order must be handed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub pnr: String,
    pub coach: String,
    pub seat: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl DeliveryInfo {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("pnr", &self.pnr), ("coach", &self.coach), ("seat", &self.seat)] {
            if value.trim().is_empty() {
                return Err(EngineError::Validation(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAgent {
    pub name: String,
    pub phone: String,
}

/// A line item with its unit price frozen at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub food_item_id: FoodItemId,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn subtotal(&self) -> Result<Decimal> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or(EngineError::InvalidAmount(self.unit_price))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Wallet,
    Gateway,
}

/// Proof that the order total was collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub method: PaymentMethod,
    pub amount: Decimal,
    /// Idempotency reference of the payment that collected the money.
    pub reference: String,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PaymentState {
    Unpaid,
    Paid(Settlement),
    /// Terminal marker: the settlement has been handed back exactly once.
    Refunded(Settlement),
}

impl PaymentState {
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentState::Paid(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentState::Unpaid => "unpaid",
            PaymentState::Paid(_) => "paid",
            PaymentState::Refunded(_) => "refunded",
        }
    }
}

/// Side effect a committed transition asks the caller to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEffect {
    None,
    Refund(Settlement),
}

/// Result of marking an order as paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled,
    AlreadySettled,
    /// The order reached a terminal status first; the money must go back.
    Closed,
}

/// An order for delivery to a seat aboard a train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: UserId,
    /// Owner of the restaurant at the time the order was placed.
    pub vendor_id: UserId,
    pub restaurant_id: RestaurantId,
    pub train_id: TrainId,
    pub delivery: DeliveryInfo,
    pub items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment: PaymentState,
    pub delivery_otp: Option<String>,
    pub delivery_agent: Option<DeliveryAgent>,
    /// Bumped on every committed write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Everything needed to persist a fresh order, after prices are resolved.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_id: UserId,
    pub vendor_id: UserId,
    pub restaurant_id: RestaurantId,
    pub train_id: TrainId,
    pub delivery: DeliveryInfo,
    pub items: Vec<LineItem>,
}

impl Order {
    /// Builds a `PENDING` order and computes
    /// `total = sum(unit_price * quantity) * (1 + tax_rate)`.
    ///
    /// Fails with `InvalidAmount` when the total does not fit in a `Decimal`.
    pub fn new(id: OrderId, draft: OrderDraft, tax_rate: Decimal, now: DateTime<Utc>) -> Result<Self> {
        let mut subtotal = Decimal::ZERO;
        for item in &draft.items {
            subtotal = subtotal
                .checked_add(item.subtotal()?)
                .ok_or(EngineError::InvalidAmount(subtotal))?;
        }
        let tax = subtotal
            .checked_mul(tax_rate)
            .ok_or(EngineError::InvalidAmount(subtotal))?;
        let total = subtotal
            .checked_add(tax)
            .ok_or(EngineError::InvalidAmount(subtotal))?;
        Ok(Self {
            id,
            customer_id: draft.customer_id,
            vendor_id: draft.vendor_id,
            restaurant_id: draft.restaurant_id,
            train_id: draft.train_id,
            delivery: draft.delivery,
            items: draft.items,
            subtotal,
            tax,
            total,
            status: OrderStatus::Pending,
            payment: PaymentState::Unpaid,
            delivery_otp: None,
            delivery_agent: None,
            version: 1,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        })
    }

    /// Checks that `actor` may act on this order in `role`.
    pub fn authorize(&self, actor: UserId, role: ActorRole) -> Result<()> {
        let owner = match role {
            ActorRole::Customer => self.customer_id,
            ActorRole::Vendor => self.vendor_id,
        };
        if owner == actor {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "{role} {actor} cannot act on order {}",
                self.id
            )))
        }
    }

    /// Applies one step of the state machine in place.
    ///
    /// Callers handle the idempotent `target == status` case before calling.
    /// The OTP is only issued once the edge is known to be legal, so a rejected
    /// request never burns a code.
    pub fn apply_transition(
        &mut self,
        target: OrderStatus,
        role: ActorRole,
        otp: Option<&str>,
        agent: Option<DeliveryAgent>,
        issue_otp: impl FnOnce() -> String,
        now: DateTime<Utc>,
    ) -> Result<TransitionEffect> {
        let illegal = EngineError::InvalidTransition {
            from: self.status,
            to: target,
        };
        if self.status.is_terminal() {
            return Err(illegal);
        }

        let mut effect = TransitionEffect::None;
        match target {
            OrderStatus::Cancelled => {
                self.delivery_otp = None;
                if let PaymentState::Paid(settlement) = &self.payment {
                    let settlement = settlement.clone();
                    self.payment = PaymentState::Refunded(settlement.clone());
                    effect = TransitionEffect::Refund(settlement);
                }
            }
            _ if role != ActorRole::Vendor || self.status.successor() != Some(target) => {
                return Err(illegal);
            }
            OrderStatus::OutForDelivery => {
                self.delivery_otp = Some(issue_otp());
                self.delivery_agent = agent;
            }
            OrderStatus::Delivered => {
                match (self.delivery_otp.as_deref(), otp) {
                    (Some(expected), Some(given)) if expected == given.trim() => {}
                    _ => return Err(EngineError::OtpMismatch),
                }
                self.delivery_otp = None;
                self.delivered_at = Some(now);
            }
            _ => {}
        }

        self.status = target;
        self.version += 1;
        self.updated_at = now;
        Ok(effect)
    }

    /// Records a settlement unless the order is already paid or closed.
    pub fn settle(&mut self, settlement: Settlement, now: DateTime<Utc>) -> SettleOutcome {
        match self.payment {
            PaymentState::Paid(_) => return SettleOutcome::AlreadySettled,
            PaymentState::Refunded(_) => return SettleOutcome::Closed,
            PaymentState::Unpaid => {}
        }
        if self.status.is_terminal() {
            return SettleOutcome::Closed;
        }
        self.payment = PaymentState::Paid(settlement);
        self.version += 1;
        self.updated_at = now;
        SettleOutcome::Settled
    }

    /// The delivery code is only ever shown to the customer who placed the order.
    pub fn redacted_for(&self, viewer: UserId) -> Order {
        let mut view = self.clone();
        if viewer != self.customer_id {
            view.delivery_otp = None;
        }
        view
    }
}
