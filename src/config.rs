use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

/// Tunables for the settlement engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applied on top of the item subtotal: `total = subtotal * (1 + tax_rate)`.
    pub tax_rate: Decimal,
    pub currency: String,
    pub max_wallet_balance: Decimal,
    pub otp_digits: usize,
    /// How many times an optimistic write is retried before giving up.
    pub max_write_retries: usize,
    #[serde(with = "millis")]
    pub gateway_timeout: Duration,
    #[serde(with = "millis")]
    pub customer_poll_interval: Duration,
    #[serde(with = "millis")]
    pub vendor_poll_interval: Duration,
    /// When set, payment confirmations must carry a valid HMAC signature.
    pub gateway_secret: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.05),
            currency: "INR".to_string(),
            max_wallet_balance: dec!(50000),
            otp_digits: 4,
            max_write_retries: 8,
            gateway_timeout: Duration::from_secs(5),
            customer_poll_interval: Duration::from_secs(10),
            vendor_poll_interval: Duration::from_secs(30),
            gateway_secret: None,
        }
    }
}

impl EngineConfig {
    /// OTP length, clamped to 4..=6 digits.
    pub fn otp_len(&self) -> usize {
        self.otp_digits.clamp(4, 6)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
