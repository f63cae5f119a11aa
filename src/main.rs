use clap::Parser;
use miette::{IntoDiagnostic, Result};
use raildine::application::engine::Stores;
use raildine::config::EngineConfig;
use raildine::domain::ports::OtpGeneratorRef;
use raildine::infrastructure::otp::RandomOtp;
#[cfg(feature = "storage-rocksdb")]
use raildine::infrastructure::rocksdb::RocksDBStore;
use raildine::interfaces::csv::order_writer::OrderWriter;
use raildine::interfaces::csv::wallet_writer::WalletWriter;
use raildine::interfaces::jsonl::command_reader::CommandReader;
use raildine::interfaces::replay::ReplaySession;
use raildine::telemetry;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Replay script, one JSON command per line
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "RAILDINE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Tax applied on top of the item subtotal
    #[arg(long, env = "RAILDINE_TAX_RATE")]
    tax_rate: Option<Decimal>,

    #[arg(long, env = "RAILDINE_CURRENCY")]
    currency: Option<String>,

    #[arg(long, env = "RAILDINE_MAX_WALLET_BALANCE")]
    max_wallet_balance: Option<Decimal>,

    /// Delivery code length, 4 to 6
    #[arg(long, env = "RAILDINE_OTP_DIGITS")]
    otp_digits: Option<usize>,

    /// Seed for delivery codes, for reproducible replays
    #[arg(long, env = "RAILDINE_OTP_SEED")]
    otp_seed: Option<u64>,

    #[arg(long, env = "RAILDINE_GATEWAY_TIMEOUT_MS")]
    gateway_timeout_ms: Option<u64>,

    /// Shared secret for payment proof signatures
    #[arg(long, env = "RAILDINE_GATEWAY_SECRET")]
    gateway_secret: Option<String>,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            tax_rate: self.tax_rate.unwrap_or(defaults.tax_rate),
            currency: self.currency.clone().unwrap_or(defaults.currency),
            max_wallet_balance: self.max_wallet_balance.unwrap_or(defaults.max_wallet_balance),
            otp_digits: self.otp_digits.unwrap_or(defaults.otp_digits),
            gateway_timeout: self
                .gateway_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            gateway_secret: self.gateway_secret.clone().or(defaults.gateway_secret),
            ..defaults
        }
    }
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(Stores {
                orders: Arc::new(store.clone()),
                ledger: Arc::new(store.clone()),
                intents: Arc::new(store),
            })
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Stores::in_memory())
        }
        None => Ok(Stores::in_memory()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = cli.config();
    let otp: OtpGeneratorRef = match cli.otp_seed {
        Some(seed) => Arc::new(RandomOtp::seeded(seed)),
        None => Arc::new(RandomOtp::new()),
    };
    let session = ReplaySession::new(open_stores(cli.db_path.clone())?, otp, config)
        .await
        .into_diagnostic()?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(BufReader::new(file));
    let (mut applied, mut rejected) = (0usize, 0usize);
    for (index, command) in reader.commands().enumerate() {
        let command = match command {
            Ok(command) => command,
            Err(err) => {
                rejected += 1;
                warn!(command = index + 1, error = %err, "Unreadable command");
                continue;
            }
        };
        match session.apply(command).await {
            Ok(()) => applied += 1,
            Err(err) if err.is_fatal() => return Err(err).into_diagnostic(),
            Err(err) => {
                rejected += 1;
                warn!(command = index + 1, error = %err, "Command rejected");
            }
        }
    }
    info!(applied, rejected, "Replay finished");

    let engine = session.engine();
    let wallets = engine.wallet_snapshot().await.into_diagnostic()?;
    let orders = engine.order_snapshot().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    WalletWriter::new(&mut out).write_wallets(&wallets).into_diagnostic()?;
    writeln!(out).into_diagnostic()?;
    OrderWriter::new(&mut out).write_orders(&orders).into_diagnostic()?;

    Ok(())
}
