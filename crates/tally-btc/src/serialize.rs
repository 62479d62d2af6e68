//! Canonical wire encoding of finalized transactions.
//!
//! Layout follows the segregated-witness serialization: version, marker and
//! flag, inputs (outpoint + empty script + sequence), outputs (8-byte value +
//! script), one witness stack per input, locktime. Encoding and decoding are
//! delegated to `bitcoin::consensus`.

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::{Transaction, Txid, Witness};

use crate::error::BtcError;
use crate::transaction::UnsignedBtcTx;

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
}

impl SignedTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn into_transaction(self) -> Transaction {
        self.tx
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn vsize(&self) -> usize {
        self.tx.vsize()
    }

    /// Canonical wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        serialize(&self.tx)
    }

    pub fn encode_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Decode wire bytes. Trailing bytes are rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, BtcError> {
        let tx: Transaction = deserialize(bytes)
            .map_err(|e| BtcError::DecodeError(format!("invalid transaction bytes: {e}")))?;
        Ok(Self { tx })
    }

    pub fn decode_hex(raw: &str) -> Result<Self, BtcError> {
        let bytes = hex::decode(raw.trim())
            .map_err(|e| BtcError::DecodeError(format!("invalid hex: {e}")))?;
        Self::decode(&bytes)
    }
}

/// Attach one witness per input, consuming the unsigned transaction.
///
/// The witness count must equal the input count and no witness may be empty,
/// so a partially signed transaction can never be finalized.
pub fn finalize(
    unsigned: UnsignedBtcTx,
    witnesses: Vec<Witness>,
) -> Result<SignedTransaction, BtcError> {
    if witnesses.len() != unsigned.tx.input.len() {
        return Err(BtcError::SigningError(format!(
            "{} witnesses for {} inputs",
            witnesses.len(),
            unsigned.tx.input.len()
        )));
    }
    if let Some(i) = witnesses.iter().position(|w| w.is_empty()) {
        return Err(BtcError::SigningError(format!("input {i} has an empty witness")));
    }
    unsigned.verify_conservation()?;

    let mut tx = unsigned.tx;
    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }
    Ok(SignedTransaction { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::address::pubkey_to_p2wpkh_address;
    use crate::network::BtcNetwork;
    use crate::sign::sign_all;
    use crate::transaction::{build_p2wpkh_transaction, FeePolicy, Payment, DEFAULT_DUST_THRESHOLD};
    use crate::utxo::{select_utxos, KeyId, OwnedUtxo, Utxo};
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use bitcoin::{Amount, OutPoint};

    fn signed_fixture(n_inputs: u8) -> (UnsignedBtcTx, SignedTransaction) {
        let secp = Secp256k1::new();
        let mut keys = BTreeMap::new();
        let mut utxos = Vec::new();
        for i in 0..n_inputs {
            let sk = SecretKey::from_slice(&[0x30 + i; 32]).unwrap();
            let pk = PublicKey::from_secret_key(&secp, &sk);
            let key = KeyId::external(u32::from(i));
            keys.insert(key, sk);
            utxos.push(OwnedUtxo {
                utxo: Utxo {
                    outpoint: OutPoint::new(Txid::from_byte_array([i + 1; 32]), u32::from(i)),
                    value: Amount::from_sat(25_000 + u64::from(i)),
                    script_pubkey: pubkey_to_p2wpkh_address(&pk.serialize(), BtcNetwork::Regtest)
                        .unwrap()
                        .script_pubkey(),
                    height: None,
                },
                key,
            });
        }
        let target = 25_000 * u64::from(n_inputs) - 2_000;
        let selection = select_utxos(&utxos, Amount::from_sat(target)).unwrap();
        let payee = utxos[0].utxo.script_pubkey.clone();
        let payee = bitcoin::Address::from_script(&payee, bitcoin::Network::Regtest).unwrap();
        let unsigned = build_p2wpkh_transaction(
            &selection,
            &[Payment::new(payee.clone(), Amount::from_sat(target - 1_000))],
            FeePolicy::Fixed { sat: 1_000 },
            &payee,
            DEFAULT_DUST_THRESHOLD,
        )
        .unwrap();
        let witnesses = sign_all(&unsigned, &keys).unwrap();
        let signed = finalize(unsigned.clone(), witnesses).unwrap();
        (unsigned, signed)
    }

    #[test]
    fn decode_of_encode_is_identity() {
        for n in 1..=3 {
            let (_, signed) = signed_fixture(n);
            let decoded = SignedTransaction::decode(&signed.encode()).unwrap();
            assert_eq!(decoded, signed);
            assert_eq!(decoded.txid(), signed.txid());
        }
    }

    #[test]
    fn round_trip_preserves_amounts_scripts_and_outpoints() {
        let (unsigned, signed) = signed_fixture(2);
        let decoded = SignedTransaction::decode_hex(&signed.encode_hex()).unwrap();
        let tx = decoded.transaction();
        for (a, b) in tx.input.iter().zip(&unsigned.tx.input) {
            assert_eq!(a.previous_output, b.previous_output);
            assert_eq!(a.sequence, b.sequence);
        }
        assert_eq!(tx.output, unsigned.tx.output);
        assert!(tx.input.iter().all(|i| i.witness.len() == 2));
    }

    #[test]
    fn wire_layout_is_segwit() {
        let (_, signed) = signed_fixture(1);
        let bytes = signed.encode();
        // version 2, little endian
        assert_eq!(&bytes[..4], &[0x02, 0x00, 0x00, 0x00]);
        // segwit marker and flag
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);
        // one input
        assert_eq!(bytes[6], 0x01);
        // locktime zero
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn txid_excludes_witness() {
        let (unsigned, signed) = signed_fixture(1);
        assert_eq!(signed.txid(), unsigned.tx.compute_txid());
        assert!(signed.vsize() < signed.encode().len());
    }

    #[test]
    fn finalize_rejects_witness_count_mismatch() {
        let (unsigned, _) = signed_fixture(2);
        assert!(finalize(unsigned, vec![Witness::new()]).is_err());
    }

    #[test]
    fn finalize_rejects_empty_witness() {
        let (unsigned, signed) = signed_fixture(2);
        let mut witnesses: Vec<Witness> = signed
            .transaction()
            .input
            .iter()
            .map(|i| i.witness.clone())
            .collect();
        witnesses[1] = Witness::new();
        assert!(finalize(unsigned, witnesses).is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(SignedTransaction::decode(&[0x02, 0x00]).is_err());
        assert!(SignedTransaction::decode_hex("zz").is_err());

        let (_, signed) = signed_fixture(1);
        let mut bytes = signed.encode();
        bytes.push(0x00);
        assert!(SignedTransaction::decode(&bytes).is_err());
    }
}
