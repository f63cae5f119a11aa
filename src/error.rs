use crate::domain::order::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Delivery OTP does not match")]
    OtpMismatch,
    #[error("Insufficient wallet balance. Available: {available}, required: {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Payment already confirmed: {0}")]
    AlreadyConfirmed(String),
    #[error("Payment declined by gateway: {0}")]
    GatewayDeclined(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Wallet balance would exceed the maximum of {limit}")]
    WalletLimitExceeded { limit: Decimal },
    #[error("Payment signature verification failed")]
    InvalidSignature,
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl EngineError {
    /// Storage and encoding failures abort the in-flight operation; everything
    /// else is a recoverable, user-actionable rejection.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::IoError(_) | EngineError::SerializationError(_) | EngineError::CsvError(_) => true,
            #[cfg(feature = "storage-rocksdb")]
            EngineError::RocksDbError(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_user_errors_are_not_fatal() {
        assert!(!EngineError::OtpMismatch.is_fatal());
        assert!(
            !EngineError::InsufficientBalance {
                available: dec!(50),
                required: dec!(210),
            }
            .is_fatal()
        );
        assert!(EngineError::IoError(std::io::Error::other("disk gone")).is_fatal());
    }

    #[test]
    fn test_transition_error_message() {
        let err = EngineError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered,
        };
        assert_eq!(err.to_string(), "Invalid transition: PENDING -> DELIVERED");
    }
}
