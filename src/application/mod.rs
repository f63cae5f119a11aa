//! Application services orchestrating the domain over the ports.
//!
//! `SettlementEngine` is the entry point; it wires a `WalletService`, an
//! `OrderEngine` and a `PaymentBridge` that share one set of stores.

pub mod engine;
pub mod orders;
pub mod payments;
pub mod sync;
pub mod wallet;
