use tally_btc::BtcError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// A hardened step was requested from a public extended key.
    #[error("Cannot derive hardened child {index}' from a public key at depth {depth}")]
    HardenedFromPublicKey { depth: u8, index: u32 },

    #[error("Derivation depth overflow at depth {depth}")]
    DepthOverflow { depth: u8 },

    #[error("Invalid derivation path {path:?}: {reason}")]
    InvalidPathSyntax { path: String, reason: String },

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Invalid extended key: {0}")]
    InvalidExtendedKey(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Btc(#[from] BtcError),
}

impl WalletError {
    pub(crate) fn path(path: &str, reason: impl Into<String>) -> Self {
        WalletError::InvalidPathSyntax {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
