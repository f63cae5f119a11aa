//! Adapters for the domain ports.

pub mod directory;
pub mod gateway;
pub mod in_memory;
pub mod otp;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
