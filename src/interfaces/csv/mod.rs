pub mod order_writer;
pub mod wallet_writer;
