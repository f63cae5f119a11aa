use crate::config::EngineConfig;
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{AppendOutcome, LedgerStoreRef};
use crate::domain::wallet::{Posting, TransactionKind, WalletAccount, WalletTransaction};
use crate::domain::{OrderId, UserId};
use crate::error::{EngineError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

/// A ledger write, flagged when it was absorbed as a replay of an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub transaction: WalletTransaction,
    pub duplicate: bool,
}

/// The only writer of the wallet ledger.
///
/// Every write is a read-check-append loop: the account is read, the posting
/// is applied to a copy, and the store accepts the append only if nobody else
/// moved the account in between. Losers re-read and try again, so concurrent
/// debits can never both pass a balance check that only one of them fits.
#[derive(Clone)]
pub struct WalletService {
    ledger: LedgerStoreRef,
    max_balance: Decimal,
    max_retries: usize,
}

impl WalletService {
    /// Creates a new `WalletService` instance.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The store holding accounts and their ledger entries.
    /// * `config` - Supplies the wallet maximum and the write retry limit.
    pub fn new(ledger: LedgerStoreRef, config: &EngineConfig) -> Self {
        Self {
            ledger,
            max_balance: config.max_wallet_balance,
            max_retries: config.max_write_retries,
        }
    }

    pub fn max_balance(&self) -> Decimal {
        self.max_balance
    }

    /// Returns the account, opening an empty one on first access.
    pub async fn account(&self, user_id: UserId) -> Result<WalletAccount> {
        match self.ledger.get(user_id).await? {
            Some(account) => Ok(account),
            None => self.ledger.open(WalletAccount::new(user_id, Utc::now())).await,
        }
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(self.account(user_id).await?.balance)
    }

    pub async fn accounts(&self) -> Result<Vec<WalletAccount>> {
        let mut accounts = self.ledger.get_all().await?;
        accounts.sort_by_key(|a| a.user_id);
        Ok(accounts)
    }

    /// Ledger entries, newest first.
    pub async fn transactions(&self, user_id: UserId) -> Result<Vec<WalletTransaction>> {
        self.account(user_id).await?;
        let mut entries = self.ledger.transactions(user_id).await?;
        entries.reverse();
        Ok(entries)
    }

    /// Adds funds to a wallet, enforcing the wallet maximum.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the wallet.
    /// * `amount` - Strictly positive amount; overflowing sums fail with `InvalidAmount`.
    /// * `description` - Stored on the ledger entry.
    /// * `order_id` - Related order, if any.
    #[instrument(skip(self, description))]
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        order_id: Option<OrderId>,
    ) -> Result<WalletTransaction> {
        let posting = Posting::new(TransactionKind::Credit, Amount::new(amount)?, description)
            .for_order(order_id);
        Ok(self.post(user_id, posting, true).await?.transaction)
    }

    /// Removes funds; the account is left untouched if it cannot cover `amount`.
    #[instrument(skip(self, description))]
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        description: &str,
        order_id: Option<OrderId>,
    ) -> Result<WalletTransaction> {
        let posting = Posting::new(TransactionKind::Debit, Amount::new(amount)?, description)
            .for_order(order_id);
        Ok(self.post(user_id, posting, false).await?.transaction)
    }

    /// Applies `posting` unless an entry with its reference already exists.
    ///
    /// Credits and refunds here are money that was already collected, so they
    /// are never refused for exceeding the wallet maximum.
    pub async fn post_once(&self, user_id: UserId, posting: Posting) -> Result<LedgerPosting> {
        if posting.reference.is_none() {
            return Err(EngineError::Validation(
                "idempotent postings need a reference".to_string(),
            ));
        }
        self.post(user_id, posting, false).await
    }

    /// Refunds a settled order to the customer's wallet, at most once per order.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
        amount: Decimal,
    ) -> Result<LedgerPosting> {
        let posting = Posting::new(
            TransactionKind::Refund,
            Amount::new(amount)?,
            format!("Refund for order #{order_id}"),
        )
        .for_order(Some(order_id))
        .with_reference(refund_reference(order_id));
        let posting = self.post_once(user_id, posting).await?;
        if !posting.duplicate {
            info!(user_id, order_id, %amount, "Order refunded to wallet");
        }
        Ok(posting)
    }

    /// Hands back money that was collected but could not be applied to its
    /// order, keyed on the reference of the payment that collected it.
    #[instrument(skip(self))]
    pub async fn return_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        amount: Decimal,
        source_reference: &str,
    ) -> Result<LedgerPosting> {
        let posting = Posting::new(
            TransactionKind::Refund,
            Amount::new(amount)?,
            format!("Unapplied payment for order #{order_id} returned to wallet"),
        )
        .for_order(Some(order_id))
        .with_reference(return_reference(source_reference));
        let posting = self.post_once(user_id, posting).await?;
        if !posting.duplicate {
            info!(user_id, order_id, %amount, source_reference, "Unapplied payment returned to wallet");
        }
        Ok(posting)
    }

    async fn post(&self, user_id: UserId, posting: Posting, enforce_limit: bool) -> Result<LedgerPosting> {
        let limit = enforce_limit.then_some(self.max_balance);
        for attempt in 0..=self.max_retries {
            let current = self.account(user_id).await?;
            let mut next = current.clone();
            let entry = match posting.apply(&mut next, limit, Utc::now()) {
                Ok(entry) => entry,
                Err(err) => {
                    // A replay must succeed even if the account could not
                    // afford the posting any more.
                    if let Some(reference) = &posting.reference
                        && let Some(existing) = self.ledger.find_by_reference(user_id, reference).await?
                    {
                        return Ok(LedgerPosting {
                            transaction: existing,
                            duplicate: true,
                        });
                    }
                    warn!(user_id, kind = ?posting.kind, amount = %posting.amount, error = %err, "Wallet posting rejected");
                    return Err(err);
                }
            };

            match self.ledger.append(next, entry.clone(), current.version).await? {
                AppendOutcome::Appended => {
                    debug!(user_id, entry_id = entry.id, amount = %entry.amount, "Ledger entry appended");
                    return Ok(LedgerPosting {
                        transaction: entry,
                        duplicate: false,
                    });
                }
                AppendOutcome::Duplicate(existing) => {
                    debug!(user_id, reference = ?existing.reference, "Ledger replay absorbed");
                    return Ok(LedgerPosting {
                        transaction: existing,
                        duplicate: true,
                    });
                }
                AppendOutcome::VersionConflict => {
                    debug!(user_id, attempt, "Wallet version conflict, retrying");
                }
            }
        }
        Err(EngineError::Conflict(format!(
            "wallet {user_id} kept changing during update"
        )))
    }
}

pub fn order_payment_reference(order_id: OrderId) -> String {
    format!("ORDER_{order_id}")
}

pub fn refund_reference(order_id: OrderId) -> String {
    format!("REFUND_{order_id}")
}

pub fn return_reference(source_reference: &str) -> String {
    format!("RETURN_{source_reference}")
}
