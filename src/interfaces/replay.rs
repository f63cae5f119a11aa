use super::jsonl::command_reader::Command;
use crate::application::engine::{Collaborators, SettlementEngine, Stores};
use crate::application::orders::TransitionRequest;
use crate::config::EngineConfig;
use crate::domain::money::Amount;
use crate::domain::payment::PaymentPurpose;
use crate::domain::ports::OtpGeneratorRef;
use crate::error::Result;
use crate::infrastructure::directory::{StaticCatalog, StaticDirectory};
use crate::infrastructure::gateway::SimulatedGateway;
use std::sync::Arc;
use tracing::debug;

/// Applies replay commands to an engine backed by in-process collaborators.
pub struct ReplaySession {
    engine: SettlementEngine,
    catalog: StaticCatalog,
    directory: StaticDirectory,
    gateway: SimulatedGateway,
}

impl ReplaySession {
    /// Wires an engine over `stores`.
    ///
    /// The simulated gateway resumes after the intents already stored, so a
    /// replay over persisted stores never reuses a gateway order id.
    pub async fn new(stores: Stores, otp: OtpGeneratorRef, config: EngineConfig) -> Result<Self> {
        let catalog = StaticCatalog::new();
        let directory = StaticDirectory::new();
        let gateway = SimulatedGateway::resuming_after(stores.intents.count().await?);
        let engine = SettlementEngine::new(
            stores,
            Collaborators {
                catalog: Arc::new(catalog.clone()),
                identity: Arc::new(directory.clone()),
                gateway: Arc::new(gateway.clone()),
                otp,
            },
            config,
        );
        Ok(Self {
            engine,
            catalog,
            directory,
            gateway,
        })
    }

    pub fn engine(&self) -> &SettlementEngine {
        &self.engine
    }

    pub async fn apply(&self, command: Command) -> Result<()> {
        debug!(?command, "Applying command");
        match command {
            Command::RegisterUser { user_id, role } => {
                self.directory.register(user_id, role).await;
            }
            Command::AddRestaurant {
                restaurant_id,
                owner_id,
            } => {
                self.catalog.add_restaurant(restaurant_id, owner_id).await;
            }
            Command::SetMenuItem {
                food_item_id,
                restaurant_id,
                price,
                available,
            } => {
                self.catalog
                    .set_item(food_item_id, restaurant_id, Amount::new(price)?, available)
                    .await;
            }
            Command::CreateOrder(request) => {
                self.engine.create_order(request).await?;
            }
            Command::Transition {
                order_id,
                actor_id,
                status,
                otp,
                agent,
            } => {
                let mut request = TransitionRequest::new(order_id, actor_id, status);
                request.otp = otp;
                request.delivery_agent = agent;
                self.engine.transition_order(request).await?;
            }
            Command::PayWallet { order_id, user_id } => {
                self.engine.pay_order_from_wallet(order_id, user_id).await?;
            }
            Command::Credit {
                user_id,
                amount,
                description,
            } => {
                let description = description.as_deref().unwrap_or("Wallet credit");
                self.engine.credit_wallet(user_id, amount, description, None).await?;
            }
            Command::Debit {
                user_id,
                amount,
                description,
            } => {
                let description = description.as_deref().unwrap_or("Wallet debit");
                self.engine.debit_wallet(user_id, amount, description, None).await?;
            }
            Command::CreateIntent {
                user_id,
                amount,
                order_id,
            } => {
                let purpose = match order_id {
                    Some(order_id) => PaymentPurpose::Order { order_id },
                    None => PaymentPurpose::WalletTopUp,
                };
                self.engine.create_payment_intent(user_id, amount, purpose).await?;
            }
            Command::ConfirmPayment(proof) => {
                self.engine.confirm_payment(proof).await?;
            }
            Command::DeclinePayment { gateway_payment_id } => {
                self.gateway.decline(&gateway_payment_id).await;
            }
            Command::FailPayment {
                gateway_order_id,
                reason,
            } => {
                self.engine.fail_payment(&gateway_order_id, &reason).await?;
            }
        }
        Ok(())
    }
}
