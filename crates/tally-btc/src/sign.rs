use std::collections::{BTreeMap, HashMap};

use bitcoin::hashes::Hash;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{CompressedPublicKey, Witness};
use rayon::prelude::*;
use tracing::debug;

use crate::error::BtcError;
use crate::transaction::UnsignedBtcTx;
use crate::utxo::KeyId;

/// Source of per-input signing keys.
///
/// Implemented by the wallet context, which derives the key for a [`KeyId`]
/// on demand. Must be shareable across signing threads.
pub trait SigningKeys: Sync {
    /// The secret key for `key`, or `None` if this source does not hold it.
    fn secret_key(&self, key: KeyId) -> Result<Option<SecretKey>, BtcError>;
}

impl SigningKeys for BTreeMap<KeyId, SecretKey> {
    fn secret_key(&self, key: KeyId) -> Result<Option<SecretKey>, BtcError> {
        Ok(self.get(&key).copied())
    }
}

impl SigningKeys for HashMap<KeyId, SecretKey> {
    fn secret_key(&self, key: KeyId) -> Result<Option<SecretKey>, BtcError> {
        Ok(self.get(&key).copied())
    }
}

/// Sign input `input_index` with `secret_key`, returning its witness stack
/// `[DER signature || SIGHASH_ALL, compressed pubkey]`.
///
/// Fails with [`BtcError::KeyScriptMismatch`] if the key does not hash to the
/// input's P2WPKH script. Reads the transaction only; other inputs are
/// untouched.
pub fn sign_input(
    unsigned: &UnsignedBtcTx,
    input_index: usize,
    secret_key: &SecretKey,
) -> Result<Witness, BtcError> {
    sign_input_with_context(&Secp256k1::new(), unsigned, input_index, secret_key)
}

/// Resolve the owner of `input_index` through the transaction's ownership
/// map and sign it with that key.
pub fn sign_owned_input<K: SigningKeys + ?Sized>(
    unsigned: &UnsignedBtcTx,
    input_index: usize,
    keys: &K,
) -> Result<Witness, BtcError> {
    sign_owned_input_with_context(&Secp256k1::new(), unsigned, input_index, keys)
}

/// Sign every input, each with its own key, in parallel.
///
/// Returns one witness per input in input order. Any failure aborts the
/// whole operation; no partially signed result is returned.
pub fn sign_all<K: SigningKeys + ?Sized>(
    unsigned: &UnsignedBtcTx,
    keys: &K,
) -> Result<Vec<Witness>, BtcError> {
    if unsigned.prevouts.len() != unsigned.tx.input.len() {
        return Err(BtcError::SigningError(format!(
            "{} prevouts for {} inputs",
            unsigned.prevouts.len(),
            unsigned.tx.input.len()
        )));
    }

    let secp = Secp256k1::new();
    let witnesses = (0..unsigned.tx.input.len())
        .into_par_iter()
        .map(|i| sign_owned_input_with_context(&secp, unsigned, i, keys))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(inputs = witnesses.len(), "signed all inputs");
    Ok(witnesses)
}

fn sign_owned_input_with_context<K: SigningKeys + ?Sized>(
    secp: &Secp256k1<All>,
    unsigned: &UnsignedBtcTx,
    input_index: usize,
    keys: &K,
) -> Result<Witness, BtcError> {
    let owner = unsigned.owner_of_input(input_index)?;
    let secret_key = keys.secret_key(owner)?.ok_or(BtcError::UnknownKeyForInput {
        input: input_index,
        outpoint: unsigned.tx.input[input_index].previous_output,
    })?;
    sign_input_with_context(secp, unsigned, input_index, &secret_key)
}

fn sign_input_with_context(
    secp: &Secp256k1<All>,
    unsigned: &UnsignedBtcTx,
    input_index: usize,
    secret_key: &SecretKey,
) -> Result<Witness, BtcError> {
    let prevout = unsigned.prevouts.get(input_index).ok_or_else(|| {
        BtcError::SigningError(format!("no prevout for input {input_index}"))
    })?;

    let public_key = PublicKey::from_secret_key(secp, secret_key);
    let compressed_pk = CompressedPublicKey(public_key);
    let script_pubkey = ScriptBuf::new_p2wpkh(&compressed_pk.wpubkey_hash());
    if prevout.script_pubkey != script_pubkey {
        return Err(BtcError::KeyScriptMismatch { input: input_index });
    }

    let mut sighash_cache = SighashCache::new(&unsigned.tx);
    let sighash = sighash_cache
        .p2wpkh_signature_hash(input_index, &script_pubkey, prevout.value, EcdsaSighashType::All)
        .map_err(|e| BtcError::SigningError(format!("sighash computation failed: {e}")))?;

    let msg = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_ecdsa(&msg, secret_key);

    // Serialize signature in DER + sighash type byte.
    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(EcdsaSighashType::All as u8);

    // Build witness: [signature, pubkey].
    let mut witness = Witness::new();
    witness.push(&sig_bytes);
    witness.push(public_key.serialize());

    Ok(witness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::pubkey_to_p2wpkh_address;
    use crate::network::BtcNetwork;
    use crate::transaction::{build_p2wpkh_transaction, FeePolicy, Payment, DEFAULT_DUST_THRESHOLD};
    use crate::utxo::{OwnedUtxo, Selection, Utxo};
    use bitcoin::{Amount, OutPoint, Txid};

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn script_for(sk: &SecretKey) -> ScriptBuf {
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), sk);
        pubkey_to_p2wpkh_address(&pk.serialize(), BtcNetwork::Testnet)
            .unwrap()
            .script_pubkey()
    }

    /// Two inputs owned by two different keys.
    fn two_owner_tx() -> (UnsignedBtcTx, BTreeMap<KeyId, SecretKey>) {
        let keys = BTreeMap::from([
            (KeyId::external(0), secret(0x41)),
            (KeyId::internal(3), secret(0x42)),
        ]);
        let selected = vec![
            OwnedUtxo {
                utxo: Utxo {
                    outpoint: OutPoint::new(Txid::from_byte_array([1; 32]), 0),
                    value: Amount::from_sat(60_000),
                    script_pubkey: script_for(&keys[&KeyId::external(0)]),
                    height: Some(10),
                },
                key: KeyId::external(0),
            },
            OwnedUtxo {
                utxo: Utxo {
                    outpoint: OutPoint::new(Txid::from_byte_array([2; 32]), 1),
                    value: Amount::from_sat(40_000),
                    script_pubkey: script_for(&keys[&KeyId::internal(3)]),
                    height: Some(11),
                },
                key: KeyId::internal(3),
            },
        ];
        let selection = Selection {
            selected,
            total: Amount::from_sat(100_000),
        };
        let payee = pubkey_to_p2wpkh_address(
            &PublicKey::from_secret_key(&Secp256k1::new(), &secret(0x50)).serialize(),
            BtcNetwork::Testnet,
        )
        .unwrap();
        let change = pubkey_to_p2wpkh_address(
            &PublicKey::from_secret_key(&Secp256k1::new(), &secret(0x51)).serialize(),
            BtcNetwork::Testnet,
        )
        .unwrap();
        let unsigned = build_p2wpkh_transaction(
            &selection,
            &[Payment::new(payee, Amount::from_sat(90_000))],
            FeePolicy::Fixed { sat: 1_000 },
            &change,
            DEFAULT_DUST_THRESHOLD,
        )
        .unwrap();
        (unsigned, keys)
    }

    fn verify_witness(unsigned: &UnsignedBtcTx, index: usize, witness: &Witness, sk: &SecretKey) {
        let secp = Secp256k1::new();
        let expected_pk = PublicKey::from_secret_key(&secp, sk);
        assert_eq!(witness.len(), 2);
        assert_eq!(witness.nth(1).unwrap(), &expected_pk.serialize()[..]);

        let sig = bitcoin::ecdsa::Signature::from_slice(witness.nth(0).unwrap()).unwrap();
        assert_eq!(sig.sighash_type, EcdsaSighashType::All);

        let sighash = SighashCache::new(&unsigned.tx)
            .p2wpkh_signature_hash(
                index,
                &unsigned.prevouts[index].script_pubkey,
                unsigned.prevouts[index].value,
                EcdsaSighashType::All,
            )
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        secp.verify_ecdsa(&msg, &sig.signature, &expected_pk).unwrap();
    }

    #[test]
    fn each_input_signed_by_its_own_key() {
        let (unsigned, keys) = two_owner_tx();
        let witnesses = sign_all(&unsigned, &keys).unwrap();
        assert_eq!(witnesses.len(), 2);
        verify_witness(&unsigned, 0, &witnesses[0], &keys[&KeyId::external(0)]);
        verify_witness(&unsigned, 1, &witnesses[1], &keys[&KeyId::internal(3)]);
        assert_ne!(witnesses[0].nth(1), witnesses[1].nth(1));
    }

    #[test]
    fn parallel_and_sequential_signing_agree() {
        let (unsigned, keys) = two_owner_tx();
        let parallel = sign_all(&unsigned, &keys).unwrap();
        let sequential: Vec<Witness> = (0..2)
            .map(|i| sign_owned_input(&unsigned, i, &keys).unwrap())
            .collect();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn signing_one_input_is_independent_of_the_other() {
        let (unsigned, keys) = two_owner_tx();
        let before = unsigned.clone();
        let second_first = sign_input(&unsigned, 1, &keys[&KeyId::internal(3)]).unwrap();
        let first = sign_input(&unsigned, 0, &keys[&KeyId::external(0)]).unwrap();
        let all = sign_all(&unsigned, &keys).unwrap();
        assert_eq!(all, vec![first, second_first]);
        assert_eq!(unsigned, before);
    }

    #[test]
    fn missing_key_is_unknown_key_for_input() {
        let (unsigned, mut keys) = two_owner_tx();
        keys.remove(&KeyId::internal(3));
        let err = sign_all(&unsigned, &keys).unwrap_err();
        assert_eq!(
            err,
            BtcError::UnknownKeyForInput {
                input: 1,
                outpoint: unsigned.tx.input[1].previous_output,
            }
        );
    }

    #[test]
    fn missing_ownership_record_is_unknown_key_for_input() {
        let (mut unsigned, keys) = two_owner_tx();
        let outpoint = unsigned.tx.input[0].previous_output;
        unsigned.owners.remove(&outpoint);
        let err = sign_owned_input(&unsigned, 0, &keys).unwrap_err();
        assert_eq!(err, BtcError::UnknownKeyForInput { input: 0, outpoint });
    }

    #[test]
    fn wrong_key_for_script_is_rejected() {
        let (unsigned, keys) = two_owner_tx();
        let err = sign_input(&unsigned, 0, &keys[&KeyId::internal(3)]).unwrap_err();
        assert_eq!(err, BtcError::KeyScriptMismatch { input: 0 });
    }

    #[test]
    fn out_of_range_input_is_an_error() {
        let (unsigned, keys) = two_owner_tx();
        assert!(sign_input(&unsigned, 5, &keys[&KeyId::external(0)]).is_err());
    }
}
