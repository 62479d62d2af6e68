use bitcoin::{Amount, OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BtcError;

/// A single unspent transaction output (UTXO).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// The transaction id and output index that identify this output.
    pub outpoint: OutPoint,
    /// Value in satoshis.
    pub value: Amount,
    /// The locking script (scriptPubKey) of the output.
    pub script_pubkey: ScriptBuf,
    /// Confirmation height reported by the provider, `None` if unconfirmed.
    pub height: Option<u32>,
}

/// Which BIP-44 chain a key lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keychain {
    /// Receive addresses (`.../0/i`).
    External,
    /// Change addresses (`.../1/i`).
    Internal,
}

impl Keychain {
    /// The non-hardened path segment selecting this chain.
    pub fn index(self) -> u32 {
        match self {
            Keychain::External => 0,
            Keychain::Internal => 1,
        }
    }
}

/// Identifies the derived key that owns an output, relative to the account
/// key: `account/keychain/index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId {
    pub keychain: Keychain,
    pub index: u32,
}

impl KeyId {
    pub fn external(index: u32) -> Self {
        Self { keychain: Keychain::External, index }
    }

    pub fn internal(index: u32) -> Self {
        Self { keychain: Keychain::Internal, index }
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.keychain.index(), self.index)
    }
}

/// A UTXO tagged with the key that can unlock it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedUtxo {
    pub utxo: Utxo,
    pub key: KeyId,
}

/// Result of UTXO selection: the chosen UTXOs and their aggregate value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// The selected UTXOs, in the order they were consumed.
    pub selected: Vec<OwnedUtxo>,
    /// Total value of the selected UTXOs.
    pub total: Amount,
}

/// A coin selection strategy.
///
/// Implementations must either return a selection whose total covers
/// `target` or fail with [`BtcError::InsufficientFunds`]; a partial result is
/// never returned.
pub trait CoinSelector {
    fn select(&self, available: &[OwnedUtxo], target: Amount) -> Result<Selection, BtcError>;
}

/// Largest-first greedy selection.
///
/// Candidates are ordered by descending value, ties broken by ascending
/// outpoint so the result is reproducible, and consumed until the running
/// sum reaches the target. Not fee-minimizing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirst;

impl CoinSelector for LargestFirst {
    fn select(&self, available: &[OwnedUtxo], target: Amount) -> Result<Selection, BtcError> {
        select_utxos(available, target)
    }
}

/// Select UTXOs with the [`LargestFirst`] policy.
///
/// A zero target is covered by the empty selection.
pub fn select_utxos(available: &[OwnedUtxo], target: Amount) -> Result<Selection, BtcError> {
    if target == Amount::ZERO {
        return Ok(Selection { selected: Vec::new(), total: Amount::ZERO });
    }

    let mut sorted: Vec<&OwnedUtxo> = available.iter().collect();
    sorted.sort_by(|a, b| {
        b.utxo
            .value
            .cmp(&a.utxo.value)
            .then_with(|| a.utxo.outpoint.cmp(&b.utxo.outpoint))
    });

    let mut selected = Vec::new();
    let mut total = Amount::ZERO;

    for candidate in sorted {
        selected.push(candidate.clone());
        total = total
            .checked_add(candidate.utxo.value)
            .ok_or_else(|| BtcError::InvalidAmount("UTXO total overflows".into()))?;

        if total >= target {
            debug!(
                inputs = selected.len(),
                total_sat = total.to_sat(),
                target_sat = target.to_sat(),
                "selected utxos"
            );
            return Ok(Selection { selected, total });
        }
    }

    Err(BtcError::InsufficientFunds {
        have: total.to_sat(),
        need: target.to_sat(),
    })
}
