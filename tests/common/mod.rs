#![allow(dead_code)]

use raildine::application::engine::{Collaborators, SettlementEngine, Stores};
use raildine::application::orders::{NewOrder, OrderLine};
use raildine::config::EngineConfig;
use raildine::domain::money::Amount;
use raildine::domain::order::{ActorRole, DeliveryInfo};
use raildine::domain::payment::PaymentProof;
use raildine::domain::UserId;
use raildine::infrastructure::directory::{StaticCatalog, StaticDirectory};
use raildine::infrastructure::gateway::SimulatedGateway;
use raildine::infrastructure::otp::FixedOtp;
use rust_decimal_macros::dec;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub const CUSTOMER: UserId = 1;
pub const VENDOR: UserId = 2;
pub const OTHER_CUSTOMER: UserId = 3;
pub const OTHER_VENDOR: UserId = 4;
pub const RESTAURANT: u64 = 10;
pub const OTP: &str = "4821";

pub struct Harness {
    pub engine: SettlementEngine,
    pub catalog: StaticCatalog,
    pub gateway: SimulatedGateway,
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    harness_over(Stores::in_memory(), SimulatedGateway::new(), config).await
}

/// An engine over `stores` with two customers, two vendors and a menu of
/// thali (100) and lassi (50) at restaurant 10.
pub async fn harness_over(stores: Stores, gateway: SimulatedGateway, config: EngineConfig) -> Harness {
    let catalog = StaticCatalog::new();
    catalog.add_restaurant(RESTAURANT, VENDOR).await;
    catalog.add_restaurant(20, OTHER_VENDOR).await;
    catalog
        .set_item(100, RESTAURANT, Amount::new(dec!(100)).unwrap(), true)
        .await;
    catalog
        .set_item(101, RESTAURANT, Amount::new(dec!(50)).unwrap(), true)
        .await;

    let identity = StaticDirectory::new();
    identity.register(CUSTOMER, ActorRole::Customer).await;
    identity.register(OTHER_CUSTOMER, ActorRole::Customer).await;
    identity.register(VENDOR, ActorRole::Vendor).await;
    identity.register(OTHER_VENDOR, ActorRole::Vendor).await;

    let engine = SettlementEngine::new(
        stores,
        Collaborators {
            catalog: Arc::new(catalog.clone()),
            identity: Arc::new(identity),
            gateway: Arc::new(gateway.clone()),
            otp: Arc::new(FixedOtp(OTP.to_string())),
        },
        config,
    );
    Harness {
        engine,
        catalog,
        gateway,
    }
}

/// One thali and two lassis: subtotal 200, total 210 at 5% tax.
pub fn thali_order(customer_id: UserId) -> NewOrder {
    NewOrder {
        customer_id,
        restaurant_id: RESTAURANT,
        train_id: 12951,
        delivery: DeliveryInfo {
            pnr: "4521367890".to_string(),
            coach: "B2".to_string(),
            seat: "34".to_string(),
            instructions: Some("Call on arrival".to_string()),
        },
        items: vec![
            OrderLine {
                food_item_id: 100,
                quantity: 1,
            },
            OrderLine {
                food_item_id: 101,
                quantity: 2,
            },
        ],
        idempotency_key: None,
    }
}

pub fn proof(gateway_order_id: &str, gateway_payment_id: &str, user_id: UserId) -> PaymentProof {
    PaymentProof {
        gateway_payment_id: gateway_payment_id.to_string(),
        gateway_order_id: gateway_order_id.to_string(),
        user_id,
        signature: None,
    }
}

pub fn write_script(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
