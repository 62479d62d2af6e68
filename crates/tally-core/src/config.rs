//! Wallet configuration loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid testnet
//! configuration. Secrets never live here.

use std::path::Path;

use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use tally_btc::network::BtcNetwork;
use tally_btc::transaction::{FeePolicy, DEFAULT_DUST_THRESHOLD};

use crate::error::WalletError;
use crate::hd_derivation::HARDENED_FLAG;

/// Default number of receive and change addresses scanned per keychain.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Default number of blocks a provider may trail the best known height.
pub const DEFAULT_MAX_PROVIDER_LAG: u32 = 2;

/// Upper bound on the gap limit; each address costs one provider query.
pub const MAX_GAP_LIMIT: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalletConfig {
    /// Network every key, address and payment must belong to.
    pub network: BtcNetwork,

    /// Account index, hardened in `m/84'/coin'/account'`.
    pub account: u32,

    /// Addresses scanned per keychain during discovery.
    pub gap_limit: u32,

    /// Change below this value is folded into the fee.
    pub dust_threshold_sat: u64,

    /// Blocks a provider may trail the best known height.
    pub max_provider_lag: u32,

    pub fee: FeePolicy,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: BtcNetwork::Testnet,
            account: 0,
            gap_limit: DEFAULT_GAP_LIMIT,
            dust_threshold_sat: DEFAULT_DUST_THRESHOLD.to_sat(),
            max_provider_lag: DEFAULT_MAX_PROVIDER_LAG,
            fee: FeePolicy::default(),
        }
    }
}

impl WalletConfig {
    pub fn for_network(network: BtcNetwork) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, WalletError> {
        let config: Self = toml::from_str(s).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, WalletError> {
        toml::to_string(self).map_err(|e| WalletError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.account >= HARDENED_FLAG {
            return Err(WalletError::Config(format!(
                "account {} exceeds 2^31 - 1",
                self.account
            )));
        }
        if self.gap_limit == 0 || self.gap_limit > MAX_GAP_LIMIT {
            return Err(WalletError::Config(format!(
                "gap_limit must be between 1 and {MAX_GAP_LIMIT}, got {}",
                self.gap_limit
            )));
        }
        if let FeePolicy::Rate { sat_per_vbyte: 0 } = self.fee {
            return Err(WalletError::Config("fee rate must be at least 1 sat/vB".into()));
        }
        if self.dust_threshold_sat == 0 {
            return Err(WalletError::Config("dust_threshold_sat must be at least 1".into()));
        }
        Ok(())
    }

    pub fn dust_threshold(&self) -> Amount {
        Amount::from_sat(self.dust_threshold_sat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = WalletConfig::from_toml_str("").unwrap();
        assert_eq!(config, WalletConfig::default());
        assert_eq!(config.network, BtcNetwork::Testnet);
        assert_eq!(config.gap_limit, 20);
        assert_eq!(config.dust_threshold(), Amount::from_sat(546));
        assert_eq!(config.fee, FeePolicy::Rate { sat_per_vbyte: 1 });
    }

    #[test]
    fn full_document_parses() {
        let config = WalletConfig::from_toml_str(
            r#"
            network = "mainnet"
            account = 2
            gap_limit = 5
            dust_threshold_sat = 1000
            max_provider_lag = 0

            [fee]
            kind = "fixed"
            sat = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.network, BtcNetwork::Mainnet);
        assert_eq!(config.account, 2);
        assert_eq!(config.gap_limit, 5);
        assert_eq!(config.dust_threshold_sat, 1000);
        assert_eq!(config.max_provider_lag, 0);
        assert_eq!(config.fee, FeePolicy::Fixed { sat: 200 });
    }

    #[test]
    fn rate_fee_parses() {
        let config = WalletConfig::from_toml_str(
            "[fee]\nkind = \"rate\"\nsat_per_vbyte = 12\n",
        )
        .unwrap();
        assert_eq!(config.fee, FeePolicy::Rate { sat_per_vbyte: 12 });
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            WalletConfig::from_toml_str("mnemonic = \"abandon\""),
            Err(WalletError::Config(_))
        ));
        assert!(WalletConfig::from_toml_str("network = \"signet\"").is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(WalletConfig::from_toml_str("gap_limit = 0").is_err());
        assert!(WalletConfig::from_toml_str("account = 2147483648").is_err());
        assert!(WalletConfig::from_toml_str("[fee]\nkind = \"rate\"\nsat_per_vbyte = 0").is_err());
    }

    #[test]
    fn zero_dust_threshold_is_rejected() {
        let err = WalletConfig::from_toml_str("dust_threshold_sat = 0").unwrap_err();
        assert!(matches!(err, WalletError::Config(msg) if msg.contains("dust_threshold_sat")));
        assert!(WalletConfig::from_toml_str("dust_threshold_sat = 1").is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network = \"regtest\"\ngap_limit = 3").unwrap();
        let config = WalletConfig::load(file.path()).unwrap();
        assert_eq!(config.network, BtcNetwork::Regtest);
        assert_eq!(config.gap_limit, 3);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WalletConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, WalletError::Config(msg) if msg.contains("absent.toml")));
    }

    #[test]
    fn serialized_config_reloads() {
        let config = WalletConfig {
            fee: FeePolicy::Fixed { sat: 300 },
            ..WalletConfig::for_network(BtcNetwork::Mainnet)
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(WalletConfig::from_toml_str(&text).unwrap(), config);
    }
}
