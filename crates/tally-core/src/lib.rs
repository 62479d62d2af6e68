//! Seed and key management plus the send pipeline for a single-account
//! BIP-84 Bitcoin wallet.
//!
//! The [`wallet::Wallet`] context owns the account key and is passed
//! explicitly to every step: discovery, selection, building, signing,
//! finalizing and broadcast. Ledger types live in [`tally_btc`].

pub mod address;
pub mod config;
pub mod discovery;
pub mod error;
pub mod hd_derivation;
pub mod mnemonic;
pub mod wallet;

pub use config::WalletConfig;
pub use error::WalletError;
pub use hd_derivation::{ChildIndex, DerivationPath, ExtendedKey, KeyKind};
pub use mnemonic::{generate_mnemonic, is_valid_word, mnemonic_to_seed, validate_mnemonic, Mnemonic, Seed, WordCount};
pub use wallet::{SendReport, Wallet};

use tally_btc::network::BtcNetwork;

/// Derive the address at `path` (e.g. `m/84'/1'/0'/0/0`) from a mnemonic.
pub fn derive_address_from_mnemonic(
    mnemonic_phrase: &str,
    passphrase: &str,
    network: BtcNetwork,
    path: &str,
) -> Result<String, WalletError> {
    let path: DerivationPath = path.parse()?;
    let seed = Mnemonic::parse(mnemonic_phrase)?.to_seed(passphrase)?;
    let root = ExtendedKey::from_seed(&seed, network)?;
    Ok(address::derive_address(&root, &path)?.to_string())
}

/// Serialized account xpub (`m/84'/coin'/account'`) for setting up a
/// watch-only wallet elsewhere.
pub fn account_xpub_from_mnemonic(
    mnemonic_phrase: &str,
    passphrase: &str,
    network: BtcNetwork,
    account: u32,
) -> Result<String, WalletError> {
    let mnemonic = Mnemonic::parse(mnemonic_phrase)?;
    let config = WalletConfig {
        account,
        ..WalletConfig::for_network(network)
    };
    Ok(Wallet::from_mnemonic(&mnemonic, passphrase, config)?.account_xpub())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn derive_address_from_phrase() {
        let addr =
            derive_address_from_mnemonic(TEST_MNEMONIC, "", BtcNetwork::Mainnet, "m/84'/0'/0'/0/0")
                .unwrap();
        assert_eq!(addr, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    }

    #[test]
    fn bad_path_is_reported_before_derivation() {
        assert!(matches!(
            derive_address_from_mnemonic(TEST_MNEMONIC, "", BtcNetwork::Mainnet, "m/84'/zero"),
            Err(WalletError::InvalidPathSyntax { .. })
        ));
    }

    #[test]
    fn passphrase_changes_addresses() {
        let plain =
            derive_address_from_mnemonic(TEST_MNEMONIC, "", BtcNetwork::Testnet, "m/84'/1'/0'/0/0")
                .unwrap();
        let salted =
            derive_address_from_mnemonic(TEST_MNEMONIC, "x", BtcNetwork::Testnet, "m/84'/1'/0'/0/0")
                .unwrap();
        assert_ne!(plain, salted);
    }

    #[test]
    fn account_xpub_opens_watch_only_wallet() {
        let xpub = account_xpub_from_mnemonic(TEST_MNEMONIC, "", BtcNetwork::Testnet, 0).unwrap();
        assert!(xpub.starts_with("tpub"));
        let watch = Wallet::watch_only(&xpub, WalletConfig::for_network(BtcNetwork::Testnet)).unwrap();
        assert_eq!(
            watch.receive_address(0).unwrap().address.to_string(),
            derive_address_from_mnemonic(TEST_MNEMONIC, "", BtcNetwork::Testnet, "m/84'/1'/0'/0/0")
                .unwrap()
        );
    }
}
