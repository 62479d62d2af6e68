use bip39::Language;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::WalletError;

/// Supported mnemonic lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    /// 128 bits of entropy.
    Words12,
    /// 256 bits of entropy.
    Words24,
}

impl WordCount {
    fn entropy_len(self) -> usize {
        match self {
            WordCount::Words12 => 16,
            WordCount::Words24 => 32,
        }
    }
}

/// A validated BIP-39 phrase. Zeroized on drop.
pub struct Mnemonic {
    phrase: String,
}

impl Mnemonic {
    /// Generate a new phrase from OS entropy.
    pub fn generate(word_count: WordCount) -> Result<Self, WalletError> {
        let mut entropy = [0u8; 32];
        let entropy = &mut entropy[..word_count.entropy_len()];
        rand::rngs::OsRng.fill_bytes(entropy);
        let mnemonic = bip39::Mnemonic::from_entropy_in(Language::English, entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()));
        entropy.zeroize();
        Ok(Self {
            phrase: mnemonic?.to_string(),
        })
    }

    /// Parse and checksum-validate an English phrase.
    pub fn parse(phrase: &str) -> Result<Self, WalletError> {
        let mnemonic = bip39::Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Self {
            phrase: mnemonic.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.phrase
    }

    pub fn words(&self) -> Vec<&str> {
        self.phrase.split_whitespace().collect()
    }

    /// BIP-39 seed: PBKDF2-HMAC-SHA512, 2048 rounds, salt `"mnemonic" || passphrase`.
    pub fn to_seed(&self, passphrase: &str) -> Result<Seed, WalletError> {
        mnemonic_to_seed(self, passphrase)
    }
}

impl Drop for Mnemonic {
    fn drop(&mut self) {
        self.phrase.zeroize();
    }
}

impl std::fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mnemonic({} words, redacted)", self.words().len())
    }
}

/// Seed bytes feeding the root key. Zeroized on drop; never leaves the process.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed(Vec<u8>);

impl Seed {
    /// Accepts the 128 to 512 bit seeds BIP-32 allows.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if !(16..=64).contains(&bytes.len()) {
            return Err(WalletError::InvalidSeed(format!(
                "seed must be 16 to 64 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Seed({} bytes, redacted)", self.0.len())
    }
}

/// Generate a new 24-word BIP-39 mnemonic (256 bits of entropy).
pub fn generate_mnemonic() -> Result<Mnemonic, WalletError> {
    Mnemonic::generate(WordCount::Words24)
}

/// Validate a mnemonic phrase
pub fn validate_mnemonic(phrase: &str) -> bool {
    bip39::Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
}

/// Derive the 64-byte seed from mnemonic + optional passphrase.
pub fn mnemonic_to_seed(mnemonic: &Mnemonic, passphrase: &str) -> Result<Seed, WalletError> {
    let parsed = bip39::Mnemonic::parse_in_normalized(Language::English, &mnemonic.phrase)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    let mut seed = parsed.to_seed(passphrase);
    let result = Seed::from_bytes(&seed);
    seed.zeroize();
    result
}

/// Validate a single word against the BIP-39 word list
pub fn is_valid_word(word: &str) -> bool {
    Language::English.find_word(word).is_some()
}
