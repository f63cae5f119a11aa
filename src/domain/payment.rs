use super::money::Amount;
use super::{OrderId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a gateway payment is for once it is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Settles the total of an existing order.
    Order { order_id: OrderId },
    /// Adds money to the payer's wallet.
    WalletTopUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IntentStatus {
    Created,
    Confirmed { gateway_payment_id: String },
    Failed { reason: String },
}

impl IntentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            IntentStatus::Created => "created",
            IntentStatus::Confirmed { .. } => "confirmed",
            IntentStatus::Failed { .. } => "failed",
        }
    }
}

/// Local record of a provisional gateway payment request.
///
/// Resolved exactly once: `Created` moves to either `Confirmed` or `Failed`
/// and never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Gateway-issued order identifier; the intent's primary key.
    pub gateway_order_id: String,
    /// Local correlation identifier (the gateway receipt).
    pub receipt: String,
    pub user_id: UserId,
    pub purpose: PaymentPurpose,
    pub amount: Amount,
    pub amount_minor: i64,
    pub currency: String,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    pub fn is_open(&self) -> bool {
        self.status == IntentStatus::Created
    }

    /// Idempotency key for the monetary effect of this intent.
    pub fn settlement_reference(&self) -> String {
        format!("PAYMENT_{}", self.gateway_order_id)
    }
}

/// What the caller gets back when opening an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentReceipt {
    pub gateway_order_id: String,
    pub receipt: String,
    pub amount: Amount,
    pub amount_minor: i64,
    pub currency: String,
}

impl From<&PaymentIntent> for IntentReceipt {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            gateway_order_id: intent.gateway_order_id.clone(),
            receipt: intent.receipt.clone(),
            amount: intent.amount,
            amount_minor: intent.amount_minor,
            currency: intent.currency.clone(),
        }
    }
}

/// Outcome of a confirmation; both variants are successes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    Settled(PaymentIntent),
    AlreadyConfirmed(PaymentIntent),
}

impl SettlementResult {
    pub fn intent(&self) -> &PaymentIntent {
        match self {
            SettlementResult::Settled(intent) | SettlementResult::AlreadyConfirmed(intent) => intent,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, SettlementResult::AlreadyConfirmed(_))
    }
}

/// Callback payload proving a payment was made at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    pub gateway_payment_id: String,
    pub gateway_order_id: String,
    pub user_id: UserId,
    #[serde(default)]
    pub signature: Option<String>,
}
