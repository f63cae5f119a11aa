use super::money::{Amount, Balance};
use super::{OrderId, UserId};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Money added to the wallet.
    Credit,
    /// Money taken out of the wallet.
    Debit,
    /// Money handed back for a cancelled order.
    Refund,
}

impl TransactionKind {
    pub fn is_inflow(self) -> bool {
        !matches!(self, TransactionKind::Debit)
    }
}

/// A customer's stored-value account.
///
/// `balance` always equals the sum of the signed amounts of the account's
/// ledger entries and never drops below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub user_id: UserId,
    pub balance: Balance,
    /// Bumped on every ledger append; used for compare-and-swap writes.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Balance::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds funds, optionally refusing to grow past `limit`.
    pub fn credit(&mut self, amount: Amount, limit: Option<Decimal>) -> Result<()> {
        let next = self.balance.checked_add(amount)?;
        if let Some(limit) = limit
            && next.value() > limit
        {
            return Err(EngineError::WalletLimitExceeded { limit });
        }
        self.balance = next;
        Ok(())
    }

    /// Removes funds if the balance covers them; leaves the account untouched otherwise.
    pub fn debit(&mut self, amount: Amount) -> Result<()> {
        if self.balance.covers(amount) {
            self.balance -= amount.into();
            Ok(())
        } else {
            Err(EngineError::InsufficientBalance {
                available: self.balance.value(),
                required: amount.value(),
            })
        }
    }
}

/// One immutable entry in a wallet's append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Position in the account's ledger, starting at 1.
    pub id: u64,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Signed: credits and refunds positive, debits negative.
    pub amount: Decimal,
    pub balance_after: Balance,
    pub description: String,
    pub order_id: Option<OrderId>,
    /// Idempotency key; an account never holds two entries with the same reference.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Posting {
    pub kind: TransactionKind,
    pub amount: Amount,
    pub description: String,
    pub order_id: Option<OrderId>,
    pub reference: Option<String>,
}

impl Posting {
    pub fn new(kind: TransactionKind, amount: Amount, description: impl Into<String>) -> Self {
        Self {
            kind,
            amount,
            description: description.into(),
            order_id: None,
            reference: None,
        }
    }

    pub fn for_order(mut self, order_id: Option<OrderId>) -> Self {
        self.order_id = order_id;
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Applies the posting to `account` and produces the entry to append.
    ///
    /// On error the account is left exactly as it was.
    pub fn apply(
        &self,
        account: &mut WalletAccount,
        limit: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<WalletTransaction> {
        let signed = if self.kind.is_inflow() {
            account.credit(self.amount, limit)?;
            self.amount.value()
        } else {
            account.debit(self.amount)?;
            -self.amount.value()
        };
        account.version += 1;
        account.updated_at = now;
        Ok(WalletTransaction {
            id: account.version,
            user_id: account.user_id,
            kind: self.kind,
            amount: signed,
            balance_after: account.balance,
            description: self.description.clone(),
            order_id: self.order_id,
            reference: self.reference.clone(),
            created_at: now,
        })
    }
}
