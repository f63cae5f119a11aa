//! The replay CLI surface: JSON-lines commands in, CSV snapshots out.

pub mod csv;
pub mod jsonl;
pub mod replay;
