//! Bitcoin ledger support for the tally wallet engine.
//!
//! Provides P2WPKH addressing, exact amount ingestion, UTXO coin selection,
//! transaction building with per-input key ownership, parallel signing,
//! canonical serialization, and the provider/broadcaster contracts the
//! wallet consumes.

pub mod address;
pub mod amount;
pub mod broadcast;
pub mod error;
pub mod network;
pub mod provider;
pub mod serialize;
pub mod sign;
pub mod transaction;
pub mod utxo;

pub use error::BtcError;
