use crate::domain::ports::{GatewayOrder, GatewayPayment, GatewayPaymentStatus, PaymentGateway};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

#[derive(Default)]
struct GatewayState {
    orders: HashMap<String, GatewayOrder>,
    declined: HashSet<String>,
}

/// An in-process payment gateway.
///
/// Gateway order ids are `order_<n>`, counting on from the `issued` passed to
/// [`resuming_after`] so that a restarted gateway never hands out an id twice.
/// Any payment against a known order is
/// captured for the full order amount unless its id was passed to [`decline`].
///
/// [`decline`]: SimulatedGateway::decline
/// [`resuming_after`]: SimulatedGateway::resuming_after
#[derive(Default, Clone)]
pub struct SimulatedGateway {
    state: Arc<RwLock<GatewayState>>,
    sequence: Arc<AtomicU64>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway whose next order id is `order_<issued + 1>`.
    ///
    /// # Arguments
    ///
    /// * `issued` - Number of gateway orders already recorded by earlier runs.
    pub fn resuming_after(issued: u64) -> Self {
        Self {
            state: Arc::default(),
            sequence: Arc::new(AtomicU64::new(issued)),
        }
    }

    /// Makes every later lookup of `gateway_payment_id` report a failure.
    pub async fn decline(&self, gateway_payment_id: &str) {
        let mut state = self.state.write().await;
        state.declined.insert(gateway_payment_id.to_string());
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    #[instrument(skip(self))]
    async fn create_order(&self, amount_minor: i64, currency: &str, receipt: &str) -> Result<GatewayOrder> {
        if amount_minor <= 0 {
            return Err(EngineError::GatewayDeclined(
                "amount must be greater than zero".to_string(),
            ));
        }
        let id = format!("order_{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        let order = GatewayOrder {
            id: id.clone(),
            amount_minor,
            currency: currency.to_string(),
        };
        let mut state = self.state.write().await;
        state.orders.insert(id, order.clone());
        debug!(gateway_order_id = %order.id, "Simulated gateway order created");
        Ok(order)
    }

    async fn fetch_payment(&self, gateway_order_id: &str, gateway_payment_id: &str) -> Result<GatewayPayment> {
        let state = self.state.read().await;
        let order = state.orders.get(gateway_order_id).ok_or_else(|| {
            EngineError::NotFound(format!("gateway order {gateway_order_id}"))
        })?;
        let status = if state.declined.contains(gateway_payment_id) {
            GatewayPaymentStatus::Failed {
                reason: "payment declined by issuer".to_string(),
            }
        } else {
            GatewayPaymentStatus::Captured
        };
        Ok(GatewayPayment {
            id: gateway_payment_id.to_string(),
            order_id: order.id.clone(),
            amount_minor: order.amount_minor,
            status,
        })
    }
}
