use crate::domain::UserId;
use crate::domain::wallet::WalletAccount;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow {
    user_id: UserId,
    balance: Decimal,
    entries: u64,
}

/// Writes wallet snapshots as CSV.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: &[WalletAccount]) -> Result<()> {
        for wallet in wallets {
            self.writer.serialize(WalletRow {
                user_id: wallet.user_id,
                balance: wallet.balance.value().normalize(),
                entries: wallet.version,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let mut wallet = WalletAccount::new(7, Utc::now());
        wallet.balance = Balance::new(dec!(290.00));
        wallet.version = 2;

        let mut out = Vec::new();
        WalletWriter::new(&mut out).write_wallets(&[wallet]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "user_id,balance,entries\n7,290,2\n");
    }
}
