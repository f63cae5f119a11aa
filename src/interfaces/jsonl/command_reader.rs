use crate::application::orders::NewOrder;
use crate::domain::order::{ActorRole, DeliveryAgent, OrderStatus};
use crate::domain::payment::PaymentProof;
use crate::domain::{FoodItemId, OrderId, RestaurantId, UserId};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::BufRead;

/// One boundary operation in a replay script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    RegisterUser {
        user_id: UserId,
        role: ActorRole,
    },
    AddRestaurant {
        restaurant_id: RestaurantId,
        owner_id: UserId,
    },
    SetMenuItem {
        food_item_id: FoodItemId,
        restaurant_id: RestaurantId,
        price: Decimal,
        #[serde(default = "available_by_default")]
        available: bool,
    },
    CreateOrder(NewOrder),
    Transition {
        order_id: OrderId,
        actor_id: UserId,
        status: OrderStatus,
        #[serde(default)]
        otp: Option<String>,
        #[serde(default)]
        agent: Option<DeliveryAgent>,
    },
    PayWallet {
        order_id: OrderId,
        user_id: UserId,
    },
    Credit {
        user_id: UserId,
        amount: Decimal,
        #[serde(default)]
        description: Option<String>,
    },
    Debit {
        user_id: UserId,
        amount: Decimal,
        #[serde(default)]
        description: Option<String>,
    },
    /// Opens a top-up intent, or an order intent when `order_id` is set.
    CreateIntent {
        user_id: UserId,
        amount: Decimal,
        #[serde(default)]
        order_id: Option<OrderId>,
    },
    ConfirmPayment(PaymentProof),
    /// Tells the simulated gateway to fail this payment id.
    DeclinePayment {
        gateway_payment_id: String,
    },
    FailPayment {
        gateway_order_id: String,
        reason: String,
    },
}

fn available_by_default() -> bool {
    true
}

/// Reads commands from a JSON-lines source.
///
/// Blank lines and lines starting with `#` are skipped.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses commands; a malformed line yields an error and reading continues.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.source.lines().filter_map(|line| match line {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    None
                } else {
                    Some(serde_json::from_str(line).map_err(Into::into))
                }
            }
            Err(err) => Some(Err(err.into())),
        })
    }
}
