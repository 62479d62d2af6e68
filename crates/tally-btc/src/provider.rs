//! UTXO provider contract and boundary validation of indexer responses.
//!
//! Indexers come in two shapes: some list the unspent outputs of an address,
//! others only answer for a single outpoint. Both are expressed through
//! [`UtxoProvider`], which reports what it supports via [`Capabilities`].
//! Every response is an untrusted snapshot tagged with the height the
//! provider had synced to.

use std::str::FromStr;

use bitcoin::address::Address;
use bitcoin::{OutPoint, ScriptBuf, Txid};
use serde::Deserialize;

use crate::amount::{sats_from_btc_f64, sats_from_btc_str, sats_from_i64};
use crate::error::BtcError;
use crate::utxo::Utxo;

/// The query shapes a provider may answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub by_address: bool,
    pub by_outpoint: bool,
}

impl Capabilities {
    pub const ADDRESS_ONLY: Self = Self { by_address: true, by_outpoint: false };
    pub const OUTPOINT_ONLY: Self = Self { by_address: false, by_outpoint: true };
    pub const ALL: Self = Self { by_address: true, by_outpoint: true };
}

/// Provider data together with the height it was synced to, if reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T> {
    pub data: T,
    pub synced_height: Option<u32>,
}

impl<T> Snapshot<T> {
    pub fn new(data: T, synced_height: Option<u32>) -> Self {
        Self { data, synced_height }
    }
}

/// A source of spendable outputs.
///
/// Implementations own their transport, timeouts and cancellation. A query
/// shape the provider cannot answer returns [`BtcError::UnsupportedQuery`].
pub trait UtxoProvider: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// All unspent outputs locked to `address`.
    fn list_unspent(&self, _address: &Address) -> Result<Snapshot<Vec<Utxo>>, BtcError> {
        Err(BtcError::UnsupportedQuery("by-address"))
    }

    /// The output at `outpoint`, or `None` if it does not exist or is spent.
    fn get_output(&self, _outpoint: &OutPoint) -> Result<Snapshot<Option<Utxo>>, BtcError> {
        Err(BtcError::UnsupportedQuery("by-outpoint"))
    }
}

/// Fail with [`BtcError::StaleProviderData`] when a provider trails the best
/// known height by more than `max_lag` blocks.
///
/// Without both heights there is nothing to compare and the data is accepted.
pub fn ensure_fresh(
    synced_height: Option<u32>,
    best_height: Option<u32>,
    max_lag: u32,
) -> Result<(), BtcError> {
    match (synced_height, best_height) {
        (Some(provider_height), Some(best_height))
            if best_height.saturating_sub(provider_height) > max_lag =>
        {
            Err(BtcError::StaleProviderData {
                provider_height,
                best_height,
                max_lag,
            })
        }
        _ => Ok(()),
    }
}

fn malformed(e: impl std::fmt::Display) -> BtcError {
    BtcError::MalformedUtxo(e.to_string())
}

fn parse_txid(raw: &str) -> Result<Txid, BtcError> {
    Txid::from_str(raw).map_err(|e| malformed(format!("invalid txid {raw:?}: {e}")))
}

fn parse_script(raw: &str) -> Result<ScriptBuf, BtcError> {
    let bytes = hex::decode(raw).map_err(|e| malformed(format!("invalid script hex: {e}")))?;
    if bytes.is_empty() {
        return Err(malformed("empty locking script"));
    }
    Ok(ScriptBuf::from(bytes))
}

/// Confirmation status as reported by address-scoped indexers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmationStatus {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u32>,
}

/// One entry of an address-scoped listing with integer satoshi values,
/// e.g. `{"txid": "...", "vout": 0, "value": 142448, "status": {...}}`.
///
/// The listing does not repeat the locking script; it is the queried
/// address's script.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressUtxoRecord {
    pub txid: String,
    pub vout: u32,
    pub value: i64,
    #[serde(default)]
    pub status: ConfirmationStatus,
}

impl AddressUtxoRecord {
    pub fn into_utxo(self, script_pubkey: &ScriptBuf) -> Result<Utxo, BtcError> {
        let txid = parse_txid(&self.txid)?;
        let value = sats_from_i64(self.value).map_err(malformed)?;
        let height = if self.status.confirmed {
            self.status.block_height
        } else {
            None
        };
        Ok(Utxo {
            outpoint: OutPoint::new(txid, self.vout),
            value,
            script_pubkey: script_pubkey.clone(),
            height,
        })
    }
}

/// Validate an address-scoped JSON listing into UTXOs locked by
/// `script_pubkey`. Any malformed entry rejects the whole listing.
pub fn parse_address_listing(json: &str, script_pubkey: &ScriptBuf) -> Result<Vec<Utxo>, BtcError> {
    let records: Vec<AddressUtxoRecord> = serde_json::from_str(json).map_err(malformed)?;
    records
        .into_iter()
        .map(|r| r.into_utxo(script_pubkey))
        .collect()
}

/// A fractional-coin value as some indexers report it: a JSON number or a
/// decimal string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DecimalValue {
    Text(String),
    Number(f64),
}

/// An outpoint-scoped record with a fractional-coin value, e.g.
/// `{"txid": "...", "output_no": 1, "value": "0.00142448", "script_hex": "0014..."}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OutpointRecord {
    pub txid: String,
    pub output_no: u32,
    pub value: DecimalValue,
    pub script_hex: String,
    #[serde(default)]
    pub block_height: Option<u32>,
}

impl OutpointRecord {
    pub fn into_utxo(self) -> Result<Utxo, BtcError> {
        let txid = parse_txid(&self.txid)?;
        let value = match &self.value {
            DecimalValue::Text(s) => sats_from_btc_str(s),
            DecimalValue::Number(n) => sats_from_btc_f64(*n),
        }
        .map_err(malformed)?;
        Ok(Utxo {
            outpoint: OutPoint::new(txid, self.output_no),
            value,
            script_pubkey: parse_script(&self.script_hex)?,
            height: self.block_height,
        })
    }
}

/// Validate a single outpoint-scoped JSON record.
pub fn parse_outpoint_record(json: &str) -> Result<Utxo, BtcError> {
    let record: OutpointRecord = serde_json::from_str(json).map_err(malformed)?;
    record.into_utxo()
}
