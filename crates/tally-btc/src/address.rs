use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::{CompressedPublicKey, ScriptBuf};

use crate::error::BtcError;
use crate::network::BtcNetwork;

/// Derive a P2WPKH (native SegWit bech32) address from a compressed public key.
///
/// The witness program is `HASH160(pubkey)`; the bech32 prefix is taken from
/// `network` (`bc`, `tb` or `bcrt`).
pub fn pubkey_to_p2wpkh_address(
    pubkey_bytes: &[u8; 33],
    network: BtcNetwork,
) -> Result<Address, BtcError> {
    let compressed_pk = CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BtcError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;

    Ok(Address::p2wpkh(&compressed_pk, network.to_bitcoin_network()))
}

/// The P2WPKH locking script for a compressed public key.
pub fn p2wpkh_script(pubkey_bytes: &[u8; 33]) -> Result<ScriptBuf, BtcError> {
    let compressed_pk = CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BtcError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;
    Ok(ScriptBuf::new_p2wpkh(&compressed_pk.wpubkey_hash()))
}

/// Parse an address string and require it to belong to `network`.
///
/// An address that is well formed but encoded for another network is
/// rejected rather than silently reinterpreted.
pub fn parse_address(address: &str, network: BtcNetwork) -> Result<Address, BtcError> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| BtcError::InvalidAddress(format!("address not valid on {network}: {e}")))
}

/// Validate a Bitcoin address string for the given network.
///
/// Returns `Ok(false)` for an address that parses but belongs to a different
/// network, and an error for anything that does not parse at all.
pub fn validate_address(address: &str, network: BtcNetwork) -> Result<bool, BtcError> {
    let parsed = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?;

    Ok(parsed.is_valid_for_network(network.to_bitcoin_network()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Generator point G, i.e. the public key of secret key 1.
    const G_COMPRESSED: &str =
        "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798";

    fn g_pubkey() -> [u8; 33] {
        hex::decode(G_COMPRESSED).unwrap().try_into().unwrap()
    }

    #[test]
    fn p2wpkh_mainnet_bip173_vector() {
        let address = pubkey_to_p2wpkh_address(&g_pubkey(), BtcNetwork::Mainnet).unwrap();
        assert_eq!(address.to_string(), "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
    }

    #[test]
    fn each_network_uses_its_own_prefix() {
        for net in [BtcNetwork::Mainnet, BtcNetwork::Testnet, BtcNetwork::Regtest] {
            let address = pubkey_to_p2wpkh_address(&g_pubkey(), net).unwrap().to_string();
            assert!(
                address.starts_with(&format!("{}1q", net.bech32_hrp())),
                "{net}: unexpected address {address}"
            );
        }
    }

    #[test]
    fn derived_address_is_only_valid_on_its_network() {
        let nets = [BtcNetwork::Mainnet, BtcNetwork::Testnet, BtcNetwork::Regtest];
        for from in nets {
            let address = pubkey_to_p2wpkh_address(&g_pubkey(), from).unwrap().to_string();
            for to in nets {
                assert_eq!(validate_address(&address, to).unwrap(), from == to);
                assert_eq!(parse_address(&address, to).is_ok(), from == to);
            }
        }
    }

    #[test]
    fn script_matches_address_script_pubkey() {
        let address = pubkey_to_p2wpkh_address(&g_pubkey(), BtcNetwork::Testnet).unwrap();
        assert_eq!(p2wpkh_script(&g_pubkey()).unwrap(), address.script_pubkey());
        assert!(address.script_pubkey().is_p2wpkh());
    }

    #[test]
    fn invalid_pubkey_returns_error() {
        assert!(pubkey_to_p2wpkh_address(&[0u8; 33], BtcNetwork::Mainnet).is_err());
        assert!(p2wpkh_script(&[0u8; 33]).is_err());
    }

    #[test]
    fn garbage_address_is_an_error() {
        assert!(validate_address("notanaddress!!!", BtcNetwork::Mainnet).is_err());
        assert!(matches!(
            parse_address("notanaddress!!!", BtcNetwork::Mainnet),
            Err(BtcError::InvalidAddress(_))
        ));
    }

    #[test]
    fn legacy_mainnet_address_parses() {
        let addr = parse_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", BtcNetwork::Mainnet).unwrap();
        assert!(addr.script_pubkey().is_p2pkh());
    }
}
