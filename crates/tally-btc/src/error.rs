use bitcoin::OutPoint;
use thiserror::Error;

/// Bitcoin ledger operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BtcError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The available value cannot cover what was asked for. No partial
    /// selection or transaction is produced.
    #[error("insufficient funds: have {have} sat, need {need} sat")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("malformed UTXO: {0}")]
    MalformedUtxo(String),

    #[error("no signing key recorded for input {input} ({outpoint})")]
    UnknownKeyForInput { input: usize, outpoint: OutPoint },

    /// The key resolved for an input does not unlock that input's script.
    #[error("key for input {input} does not match its locking script")]
    KeyScriptMismatch { input: usize },

    #[error("provider data is stale: synced to {provider_height}, best known {best_height} (max lag {max_lag})")]
    StaleProviderData {
        provider_height: u32,
        best_height: u32,
        max_lag: u32,
    },

    #[error("provider does not support {0} queries")]
    UnsupportedQuery(&'static str),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("broadcast rejected: {reason}")]
    BroadcastRejected { reason: String },

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("value not conserved: inputs {inputs} sat, outputs {outputs} sat, fee {fee} sat")]
    ConservationViolated { inputs: u64, outputs: u64, fee: u64 },

    #[error("signing error: {0}")]
    SigningError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),
}
