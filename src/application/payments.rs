use super::orders::{OrderEngine, settled_by};
use super::wallet::WalletService;
use crate::config::EngineConfig;
use crate::domain::UserId;
use crate::domain::money::Amount;
use crate::domain::order::{ActorRole, PaymentMethod, SettleOutcome, Settlement};
use crate::domain::payment::{
    IntentReceipt, IntentStatus, PaymentIntent, PaymentProof, PaymentPurpose, SettlementResult,
};
use crate::domain::ports::{
    GatewayPayment, GatewayPaymentStatus, PaymentGatewayRef, PaymentIntentStoreRef,
};
use crate::domain::wallet::{Posting, TransactionKind};
use crate::error::{EngineError, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Bridges the external gateway to the wallet and order engine.
///
/// An intent is resolved once. Its monetary effect is keyed on
/// `PAYMENT_<gateway order id>`, so a confirmation replayed after a crash
/// between the effect and the status write cannot apply twice.
#[derive(Clone)]
pub struct PaymentBridge {
    intents: PaymentIntentStoreRef,
    gateway: PaymentGatewayRef,
    orders: OrderEngine,
    wallet: WalletService,
    currency: String,
    gateway_timeout: Duration,
    secret: Option<String>,
    topups: Arc<AtomicU64>,
}

impl PaymentBridge {
    pub fn new(
        intents: PaymentIntentStoreRef,
        gateway: PaymentGatewayRef,
        orders: OrderEngine,
        wallet: WalletService,
        config: &EngineConfig,
    ) -> Self {
        Self {
            intents,
            gateway,
            orders,
            wallet,
            currency: config.currency.clone(),
            gateway_timeout: config.gateway_timeout,
            secret: config.gateway_secret.clone(),
            topups: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Opens a gateway order for `amount` and records a `Created` intent.
    /// Nothing moves until the intent is confirmed.
    #[instrument(skip(self))]
    pub async fn create_intent(
        &self,
        user_id: UserId,
        amount: Decimal,
        purpose: PaymentPurpose,
    ) -> Result<IntentReceipt> {
        let amount = Amount::new(amount)?;
        let amount_minor = amount.to_minor()?;

        let receipt = match purpose {
            PaymentPurpose::Order { order_id } => {
                let order = self.orders.load(order_id).await?;
                order.authorize(user_id, ActorRole::Customer)?;
                if order.status.is_terminal() {
                    return Err(EngineError::Validation(format!(
                        "order {order_id} is {} and cannot be paid",
                        order.status
                    )));
                }
                if order.payment.is_settled() {
                    return Err(EngineError::Validation(format!(
                        "order {order_id} is already paid"
                    )));
                }
                if Amount::new(order.total)?.to_minor()? != amount_minor {
                    return Err(EngineError::Validation(format!(
                        "intent amount {amount} does not match order total {}",
                        order.total
                    )));
                }
                format!("receipt_{order_id}")
            }
            PaymentPurpose::WalletTopUp => {
                if amount.value().round_dp(2) != amount.value() {
                    return Err(EngineError::InvalidAmount(amount.value()));
                }
                let balance = self.wallet.balance(user_id).await?;
                if balance.checked_add(amount)?.value() > self.wallet.max_balance() {
                    return Err(EngineError::WalletLimitExceeded {
                        limit: self.wallet.max_balance(),
                    });
                }
                let n = self.topups.fetch_add(1, Ordering::SeqCst) + 1;
                format!("wallet_topup_{user_id}_{}_{n}", Utc::now().timestamp_millis())
            }
        };

        let gateway_order = timeout(
            self.gateway_timeout,
            self.gateway.create_order(amount_minor, &self.currency, &receipt),
        )
        .await
        .map_err(|_| EngineError::GatewayDeclined("gateway timed out creating order".to_string()))??;

        let intent = PaymentIntent {
            gateway_order_id: gateway_order.id,
            receipt,
            user_id,
            purpose,
            amount,
            amount_minor,
            currency: gateway_order.currency,
            status: IntentStatus::Created,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.intents.insert(intent.clone()).await?;
        info!(gateway_order_id = %intent.gateway_order_id, receipt = %intent.receipt, "Payment intent created");
        Ok(IntentReceipt::from(&intent))
    }

    /// Applies a gateway payment to its intent, exactly once.
    ///
    /// A repeated confirmation of a confirmed intent returns
    /// [`SettlementResult::AlreadyConfirmed`] without touching any balance.
    #[instrument(skip(self, proof), fields(gateway_order_id = %proof.gateway_order_id, gateway_payment_id = %proof.gateway_payment_id))]
    pub async fn confirm_payment(&self, proof: PaymentProof) -> Result<SettlementResult> {
        self.verify_signature(&proof)?;

        let intent = self.get_intent(&proof.gateway_order_id).await?;
        if intent.user_id != proof.user_id {
            return Err(EngineError::Forbidden(format!(
                "user {} did not open intent {}",
                proof.user_id, intent.gateway_order_id
            )));
        }
        match intent.status.clone() {
            IntentStatus::Confirmed { gateway_payment_id } if gateway_payment_id == proof.gateway_payment_id => {
                debug!("Duplicate confirmation absorbed");
                return Ok(SettlementResult::AlreadyConfirmed(intent));
            }
            IntentStatus::Confirmed { .. } => {
                return Err(EngineError::AlreadyConfirmed(intent.gateway_order_id));
            }
            IntentStatus::Failed { reason } => {
                return Err(EngineError::GatewayDeclined(reason));
            }
            IntentStatus::Created => {}
        }

        let payment = match timeout(
            self.gateway_timeout,
            self.gateway
                .fetch_payment(&intent.gateway_order_id, &proof.gateway_payment_id),
        )
        .await
        {
            Ok(Ok(payment)) => payment,
            Ok(Err(err)) if err.is_fatal() => return Err(err),
            Ok(Err(err)) => return self.decline(intent, err.to_string()).await,
            Err(_) => return self.decline(intent, "gateway timed out".to_string()).await,
        };
        if let GatewayPaymentStatus::Failed { reason } = &payment.status {
            return self.decline(intent, reason.clone()).await;
        }
        if payment.order_id != intent.gateway_order_id || payment.amount_minor != intent.amount_minor {
            let reason = format!(
                "captured {} minor units against {}, expected {} against {}",
                payment.amount_minor, payment.order_id, intent.amount_minor, intent.gateway_order_id
            );
            return self.decline(intent, reason).await;
        }

        self.apply_effect(&intent, &payment).await?;

        let mut confirmed = intent.clone();
        confirmed.status = IntentStatus::Confirmed {
            gateway_payment_id: payment.id.clone(),
        };
        confirmed.resolved_at = Some(Utc::now());

        let mut expected = IntentStatus::Created;
        loop {
            if self.intents.compare_and_swap(confirmed.clone(), &expected).await? {
                info!(user_id = intent.user_id, purpose = ?intent.purpose, amount = %intent.amount, "Payment confirmed");
                return Ok(SettlementResult::Settled(confirmed));
            }
            let stored = self.get_intent(&intent.gateway_order_id).await?;
            match &stored.status {
                IntentStatus::Confirmed { .. } => return Ok(SettlementResult::AlreadyConfirmed(stored)),
                // The money already moved; the record has to follow it.
                IntentStatus::Failed { .. } if expected == IntentStatus::Created => {
                    expected = stored.status.clone();
                }
                _ => {
                    return Err(EngineError::Conflict(format!(
                        "intent {} changed during confirmation",
                        intent.gateway_order_id
                    )));
                }
            }
        }
    }

    /// Records an explicit decline reported by the gateway.
    #[instrument(skip(self))]
    pub async fn fail_payment(&self, gateway_order_id: &str, reason: &str) -> Result<PaymentIntent> {
        let intent = self.get_intent(gateway_order_id).await?;
        match &intent.status {
            IntentStatus::Created => self.mark_failed(intent, reason.to_string()).await,
            IntentStatus::Failed { .. } => Ok(intent),
            IntentStatus::Confirmed { .. } => Err(EngineError::AlreadyConfirmed(intent.gateway_order_id)),
        }
    }

    pub async fn get_intent(&self, gateway_order_id: &str) -> Result<PaymentIntent> {
        self.intents
            .get(gateway_order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("payment intent {gateway_order_id}")))
    }

    pub async fn intents_for_user(&self, user_id: UserId) -> Result<Vec<PaymentIntent>> {
        self.intents.list_for_user(user_id).await
    }

    async fn apply_effect(&self, intent: &PaymentIntent, payment: &GatewayPayment) -> Result<()> {
        let reference = intent.settlement_reference();
        let captured = Amount::from_minor(payment.amount_minor)?;

        match intent.purpose {
            PaymentPurpose::WalletTopUp => {
                let posting = Posting::new(TransactionKind::Credit, captured, "Wallet top-up")
                    .with_reference(reference);
                self.wallet.post_once(intent.user_id, posting).await?;
            }
            PaymentPurpose::Order { order_id } => {
                let settlement = Settlement {
                    method: PaymentMethod::Gateway,
                    amount: captured.value(),
                    reference: reference.clone(),
                    settled_at: Utc::now(),
                };
                let (order, outcome) = self.orders.settle(order_id, settlement).await?;
                if outcome != SettleOutcome::Settled && !settled_by(&order, &reference) {
                    warn!(order_id, status = %order.status, payment = order.payment.label(), "Order cannot take this payment, crediting wallet");
                    self.wallet
                        .return_payment(intent.user_id, order_id, captured.value(), &reference)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn decline(&self, intent: PaymentIntent, reason: String) -> Result<SettlementResult> {
        let stored = self.mark_failed(intent, reason.clone()).await?;
        match stored.status {
            IntentStatus::Confirmed { .. } => Ok(SettlementResult::AlreadyConfirmed(stored)),
            _ => Err(EngineError::GatewayDeclined(reason)),
        }
    }

    /// Moves a `Created` intent to `Failed`; returns the intent as stored afterwards.
    async fn mark_failed(&self, intent: PaymentIntent, reason: String) -> Result<PaymentIntent> {
        let mut failed = intent.clone();
        failed.status = IntentStatus::Failed {
            reason: reason.clone(),
        };
        failed.resolved_at = Some(Utc::now());
        if self
            .intents
            .compare_and_swap(failed.clone(), &IntentStatus::Created)
            .await?
        {
            warn!(gateway_order_id = %intent.gateway_order_id, %reason, "Payment intent failed");
            return Ok(failed);
        }
        self.get_intent(&intent.gateway_order_id).await
    }

    fn verify_signature(&self, proof: &PaymentProof) -> Result<()> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let signature = proof.signature.as_deref().ok_or(EngineError::InvalidSignature)?;
        let expected = hex::decode(signature).map_err(|_| EngineError::InvalidSignature)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| EngineError::InvalidSignature)?;
        mac.update(signed_payload(&proof.gateway_order_id, &proof.gateway_payment_id).as_bytes());
        mac.verify_slice(&expected).map_err(|_| {
            warn!(gateway_order_id = %proof.gateway_order_id, "Rejected payment proof with bad signature");
            EngineError::InvalidSignature
        })
    }
}

fn signed_payload(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{gateway_order_id}|{gateway_payment_id}")
}

/// Signs a payment proof the way the gateway does.
pub fn sign_payment(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EngineError::Validation("unusable gateway secret".to_string()))?;
    mac.update(signed_payload(gateway_order_id, gateway_payment_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
