use std::collections::BTreeMap;

use bitcoin::absolute::LockTime;
use bitcoin::address::Address;
use bitcoin::script::ScriptBuf;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address::parse_address;
use crate::amount::checked_sum;
use crate::error::BtcError;
use crate::network::BtcNetwork;
use crate::utxo::{KeyId, Selection};

/// Estimated virtual size of a P2WPKH input (in vbytes).
/// Breakdown: 41 bytes non-witness + ~107 witness bytes / 4 = ~68 vbytes per input.
const P2WPKH_INPUT_VBYTES: u64 = 68;

/// Estimated virtual size of any output (in vbytes).
const OUTPUT_VBYTES: u64 = 31;

/// Fixed transaction overhead (in vbytes): version + locktime + segwit marker/flag + counts.
const TX_OVERHEAD_VBYTES: u64 = 11;

/// Smallest change output worth creating. P2WPKH relay dust limit.
pub const DEFAULT_DUST_THRESHOLD: Amount = Amount::from_sat(546);

/// How the fee of a transaction is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeePolicy {
    /// A fixed absolute fee in satoshis.
    Fixed { sat: u64 },
    /// A fee rate applied to the estimated P2WPKH virtual size.
    Rate { sat_per_vbyte: u64 },
}

impl FeePolicy {
    /// The fee this policy charges for a transaction of the given shape.
    pub fn fee_for(self, num_inputs: usize, num_outputs: usize) -> Amount {
        match self {
            FeePolicy::Fixed { sat } => Amount::from_sat(sat),
            FeePolicy::Rate { sat_per_vbyte } => {
                Amount::from_sat(estimate_fee(num_inputs, num_outputs, sat_per_vbyte))
            }
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy::Rate { sat_per_vbyte: 1 }
    }
}

/// Estimate the fee for a P2WPKH transaction.
///
/// Computes `estimated_vsize * fee_rate_sat_vbyte` where the vsize is derived
/// from the number of inputs and outputs using P2WPKH weight estimates.
pub fn estimate_fee(num_inputs: usize, num_outputs: usize, fee_rate_sat_vbyte: u64) -> u64 {
    estimate_vsize(num_inputs, num_outputs).saturating_mul(fee_rate_sat_vbyte)
}

/// Estimated virtual size of a P2WPKH transaction.
pub fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES
        + (num_inputs as u64 * P2WPKH_INPUT_VBYTES)
        + (num_outputs as u64 * OUTPUT_VBYTES)
}

/// A requested payment: destination and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub address: Address,
    pub amount: Amount,
}

impl Payment {
    pub fn new(address: Address, amount: Amount) -> Self {
        Self { address, amount }
    }

    /// Parse the destination and require it to belong to `network`.
    pub fn parse(address: &str, amount: Amount, network: BtcNetwork) -> Result<Self, BtcError> {
        Ok(Self {
            address: parse_address(address, network)?,
            amount,
        })
    }
}

/// Maps each input's outpoint to the derived key that unlocks it.
///
/// Built from the selection, never assumed to be one key for the whole
/// transaction. Signing consults it per input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyOwnershipMap(BTreeMap<OutPoint, KeyId>);

impl KeyOwnershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the owner of `outpoint`, returning the previous owner if one
    /// was already recorded.
    pub fn insert(&mut self, outpoint: OutPoint, key: KeyId) -> Option<KeyId> {
        self.0.insert(outpoint, key)
    }

    pub fn owner_of(&self, outpoint: &OutPoint) -> Option<KeyId> {
        self.0.get(outpoint).copied()
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<KeyId> {
        self.0.remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &KeyId)> {
        self.0.iter()
    }
}

/// Change that fell below the dust threshold and was added to the fee
/// instead of becoming an output. Informational, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DustChangeSuppressed {
    /// Satoshis paid as fee beyond the no-change fee the policy asked for.
    ///
    /// Under a rate policy this also covers the vbytes the dropped change
    /// output would have cost, so it can exceed the change value itself.
    pub amount: Amount,
}

/// An unsigned Bitcoin transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedBtcTx {
    /// The bitcoin transaction with empty witnesses.
    pub tx: Transaction,
    /// The outputs being spent, in the same order as the transaction inputs.
    /// Needed for computing sighashes during signing.
    pub prevouts: Vec<TxOut>,
    /// Owning key of every input.
    pub owners: KeyOwnershipMap,
    /// The fee actually paid: inputs minus outputs.
    pub fee: Amount,
    /// Position of the change output, if one was created.
    pub change_index: Option<usize>,
    /// Set when dust change was folded into the fee.
    pub dust_suppressed: Option<DustChangeSuppressed>,
}

impl UnsignedBtcTx {
    pub fn input_total(&self) -> Result<Amount, BtcError> {
        checked_sum(self.prevouts.iter().map(|p| p.value))
    }

    pub fn output_total(&self) -> Result<Amount, BtcError> {
        checked_sum(self.tx.output.iter().map(|o| o.value))
    }

    /// The key recorded for input `input`.
    pub fn owner_of_input(&self, input: usize) -> Result<KeyId, BtcError> {
        let txin = self.tx.input.get(input).ok_or_else(|| {
            BtcError::SigningError(format!("input index {input} out of range"))
        })?;
        self.owners
            .owner_of(&txin.previous_output)
            .ok_or(BtcError::UnknownKeyForInput {
                input,
                outpoint: txin.previous_output,
            })
    }

    /// Check `sum(outputs) + fee == sum(inputs)` exactly.
    pub fn verify_conservation(&self) -> Result<(), BtcError> {
        let inputs = self.input_total()?;
        let outputs = self.output_total()?;
        if outputs.checked_add(self.fee) != Some(inputs) {
            return Err(BtcError::ConservationViolated {
                inputs: inputs.to_sat(),
                outputs: outputs.to_sat(),
                fee: self.fee.to_sat(),
            });
        }
        Ok(())
    }
}

/// Build an unsigned P2WPKH Bitcoin transaction from a finished selection.
///
/// Inputs follow selection order and each is tagged with the key that owns
/// its UTXO. One output is created per payment. Change is appended only if it
/// reaches `dust_threshold`; smaller change is added to the fee and reported
/// through [`UnsignedBtcTx::dust_suppressed`].
pub fn build_p2wpkh_transaction(
    selection: &Selection,
    payments: &[Payment],
    fee_policy: FeePolicy,
    change_address: &Address,
    dust_threshold: Amount,
) -> Result<UnsignedBtcTx, BtcError> {
    if selection.selected.is_empty() {
        return Err(BtcError::TransactionBuildError("no inputs selected".into()));
    }
    if payments.is_empty() {
        return Err(BtcError::TransactionBuildError("no payments requested".into()));
    }
    if let Some(zero) = payments.iter().find(|p| p.amount == Amount::ZERO) {
        return Err(BtcError::InvalidAmount(format!(
            "payment to {} has zero value",
            zero.address
        )));
    }

    // Build inputs.
    let mut inputs = Vec::with_capacity(selection.selected.len());
    let mut prevouts = Vec::with_capacity(selection.selected.len());
    let mut owners = KeyOwnershipMap::new();

    for owned in &selection.selected {
        let outpoint = owned.utxo.outpoint;
        if owners.insert(outpoint, owned.key).is_some() {
            return Err(BtcError::TransactionBuildError(format!(
                "outpoint {outpoint} selected twice"
            )));
        }

        inputs.push(TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(), // Empty for segwit.
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::default(),
        });

        prevouts.push(TxOut {
            value: owned.utxo.value,
            script_pubkey: owned.utxo.script_pubkey.clone(),
        });
    }

    let input_total = checked_sum(prevouts.iter().map(|p| p.value))?;
    let payment_total = checked_sum(payments.iter().map(|p| p.amount))?;

    let n_in = inputs.len();
    let fee_with_change = fee_policy.fee_for(n_in, payments.len() + 1);
    let fee_without_change = fee_policy.fee_for(n_in, payments.len());

    let need = payment_total
        .checked_add(fee_without_change)
        .ok_or_else(|| BtcError::InvalidAmount("payment plus fee overflows".into()))?;
    if input_total < need {
        return Err(BtcError::InsufficientFunds {
            have: input_total.to_sat(),
            need: need.to_sat(),
        });
    }

    let mut outputs: Vec<TxOut> = payments
        .iter()
        .map(|p| TxOut {
            value: p.amount,
            script_pubkey: p.address.script_pubkey(),
        })
        .collect();

    // Change computed against the two-output fee; `None` when negative.
    let change = input_total
        .checked_sub(payment_total)
        .and_then(|rest| rest.checked_sub(fee_with_change));

    let (fee, change_index, dust_suppressed) = match change {
        Some(change) if change > Amount::ZERO && change >= dust_threshold => {
            outputs.push(TxOut {
                value: change,
                script_pubkey: change_address.script_pubkey(),
            });
            (fee_with_change, Some(outputs.len() - 1), None)
        }
        _ => {
            // No change output: everything left over is fee.
            let fee = input_total - payment_total;
            let rolled = fee - fee_without_change;
            let suppressed = (rolled > Amount::ZERO).then_some(DustChangeSuppressed { amount: rolled });
            if let Some(s) = suppressed {
                info!(dust_sat = s.amount.to_sat(), "change below dust threshold folded into fee");
            }
            (fee, None, suppressed)
        }
    };

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    let unsigned = UnsignedBtcTx {
        tx,
        prevouts,
        owners,
        fee,
        change_index,
        dust_suppressed,
    };
    unsigned.verify_conservation()?;

    debug!(
        inputs = n_in,
        outputs = unsigned.tx.output.len(),
        fee_sat = fee.to_sat(),
        "built unsigned transaction"
    );
    Ok(unsigned)
}
