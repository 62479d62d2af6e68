use bitcoin::address::Address;
use bitcoin::ScriptBuf;
use tally_btc::network::BtcNetwork;
use tally_btc::utxo::KeyId;

use crate::error::WalletError;
use crate::hd_derivation::{DerivationPath, ExtendedKey};

/// An address handed out by the wallet, with the key and path behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: Address,
    pub key: KeyId,
    pub derivation_path: DerivationPath,
}

impl DerivedAddress {
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }
}

/// P2WPKH address of `key` on `network`.
///
/// Works on either key kind; only the public half is used. The key must have
/// been created for `network` so an address is never re-tagged for a chain
/// it was not derived for.
pub fn to_address(key: &ExtendedKey, network: BtcNetwork) -> Result<Address, WalletError> {
    if key.network() != network {
        return Err(tally_btc::BtcError::InvalidNetwork(format!(
            "key belongs to {}, address requested for {network}",
            key.network()
        ))
        .into());
    }
    Ok(tally_btc::address::pubkey_to_p2wpkh_address(
        &key.public_key_bytes(),
        network,
    )?)
}

/// P2WPKH locking script of `key`.
pub fn to_script(key: &ExtendedKey) -> Result<ScriptBuf, WalletError> {
    Ok(tally_btc::address::p2wpkh_script(&key.public_key_bytes())?)
}

/// Derive `path` from `root` and return its address.
pub fn derive_address(
    root: &ExtendedKey,
    path: &DerivationPath,
) -> Result<Address, WalletError> {
    to_address(&root.derive(path)?, root.network())
}

/// Validate an address string for the given network
pub fn validate_address(address: &str, network: BtcNetwork) -> Result<bool, WalletError> {
    Ok(tally_btc::address::validate_address(address, network)?)
}
