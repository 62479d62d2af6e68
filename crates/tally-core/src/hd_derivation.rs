use std::str::FromStr;

use bip32::{ChildNumber, Prefix, XPrv, XPub};
use bitcoin::secp256k1::SecretKey;
use tally_btc::network::BtcNetwork;
use tally_btc::utxo::KeyId;
use zeroize::Zeroizing;

use crate::error::WalletError;
use crate::mnemonic::Seed;

/// Bit marking a hardened index in its 32-bit wire form.
pub const HARDENED_FLAG: u32 = 1 << 31;

/// BIP-84 purpose for native SegWit P2WPKH.
pub const BIP84_PURPOSE: u32 = 84;

/// One path segment: a 31-bit index plus hardened flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildIndex {
    index: u32,
    hardened: bool,
}

impl ChildIndex {
    /// Fails for `index >= 2^31`; hardening is the flag, never the high bit.
    pub fn new(index: u32, hardened: bool) -> Result<Self, WalletError> {
        if index >= HARDENED_FLAG {
            return Err(WalletError::path(
                &index.to_string(),
                format!("index {index} exceeds 2^31 - 1"),
            ));
        }
        Ok(Self { index, hardened })
    }

    pub fn normal(index: u32) -> Result<Self, WalletError> {
        Self::new(index, false)
    }

    pub fn hardened(index: u32) -> Result<Self, WalletError> {
        Self::new(index, true)
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn is_hardened(self) -> bool {
        self.hardened
    }

    /// The 32-bit form fed to the derivation HMAC.
    pub fn to_u32(self) -> u32 {
        if self.hardened {
            self.index | HARDENED_FLAG
        } else {
            self.index
        }
    }

    fn from_child_number(number: ChildNumber) -> Self {
        Self {
            index: number.index(),
            hardened: number.is_hardened(),
        }
    }

    fn to_child_number(self) -> Result<ChildNumber, WalletError> {
        ChildNumber::new(self.index, self.hardened)
            .map_err(|e| WalletError::DerivationFailed(e.to_string()))
    }
}

impl std::fmt::Display for ChildIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Ordered root-to-leaf derivation steps, e.g. `m/84'/1'/0'/0/5`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<ChildIndex>);

impl DerivationPath {
    pub fn new(segments: Vec<ChildIndex>) -> Self {
        Self(segments)
    }

    /// The empty path, deriving the key itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// `m/84'/coin'/account'` for `network`.
    pub fn bip84_account(network: BtcNetwork, account: u32) -> Result<Self, WalletError> {
        Ok(Self(vec![
            ChildIndex::hardened(BIP84_PURPOSE)?,
            ChildIndex::hardened(network.coin_type())?,
            ChildIndex::hardened(account)?,
        ]))
    }

    /// `keychain/index` below an account key.
    pub fn for_key(key: KeyId) -> Result<Self, WalletError> {
        Ok(Self(vec![
            ChildIndex::normal(key.keychain.index())?,
            ChildIndex::normal(key.index)?,
        ]))
    }

    pub fn segments(&self) -> &[ChildIndex] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_hardened(&self) -> bool {
        self.0.iter().any(|c| c.is_hardened())
    }

    /// `self ++ other`.
    pub fn join(&self, other: &DerivationPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&other.0);
        Self(segments)
    }

    pub fn child(&self, index: ChildIndex) -> Self {
        let mut segments = self.0.clone();
        segments.push(index);
        Self(segments)
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    /// Parses `/`-separated decimal indices with an optional leading `m` and
    /// `'`, `h` or `H` as hardening marker.
    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(WalletError::path(path, "empty path"));
        }

        let mut parts = trimmed.split('/').peekable();
        if matches!(parts.peek(), Some(&"m") | Some(&"M")) {
            parts.next();
        }

        let mut segments = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(WalletError::path(
                    path,
                    format!("segment {part:?} is not a decimal index"),
                ));
            }
            let index: u32 = digits
                .parse()
                .map_err(|_| WalletError::path(path, format!("segment {part:?} overflows")))?;
            if index >= HARDENED_FLAG {
                return Err(WalletError::path(
                    path,
                    format!("index {index} exceeds 2^31 - 1; mark hardening explicitly"),
                ));
            }
            segments.push(ChildIndex { index, hardened });
        }
        Ok(Self(segments))
    }
}

impl std::fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m")?;
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Whether an extended key carries private material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Private,
    Public,
}

#[derive(Clone)]
enum KeyMaterial {
    Private(XPrv),
    Public(XPub),
}

/// A BIP-32 extended key tagged with the network it serializes for.
///
/// A private key derives hardened and normal children and can be neutered
/// into its public counterpart; a public key derives normal children only.
#[derive(Clone)]
pub struct ExtendedKey {
    network: BtcNetwork,
    material: KeyMaterial,
}

impl ExtendedKey {
    /// Root (depth 0) private key: `HMAC-SHA512("Bitcoin seed", seed)`.
    pub fn from_seed(seed: &Seed, network: BtcNetwork) -> Result<Self, WalletError> {
        let xprv = XPrv::new(seed.as_bytes()).map_err(|e| WalletError::InvalidSeed(e.to_string()))?;
        Ok(Self {
            network,
            material: KeyMaterial::Private(xprv),
        })
    }

    /// Parse an `xpub`/`tpub` string, requiring the prefix of `network`.
    pub fn from_xpub_str(s: &str, network: BtcNetwork) -> Result<Self, WalletError> {
        let parsed = parse_with_prefix(s, public_prefix(network))?;
        let xpub = XPub::try_from(parsed).map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;
        Ok(Self {
            network,
            material: KeyMaterial::Public(xpub),
        })
    }

    /// Parse an `xprv`/`tprv` string, requiring the prefix of `network`.
    pub fn from_xprv_str(s: &str, network: BtcNetwork) -> Result<Self, WalletError> {
        let parsed = parse_with_prefix(s, private_prefix(network))?;
        let xprv = XPrv::try_from(parsed).map_err(|e| WalletError::InvalidExtendedKey(e.to_string()))?;
        Ok(Self {
            network,
            material: KeyMaterial::Private(xprv),
        })
    }

    pub fn kind(&self) -> KeyKind {
        match self.material {
            KeyMaterial::Private(_) => KeyKind::Private,
            KeyMaterial::Public(_) => KeyKind::Public,
        }
    }

    pub fn is_private(&self) -> bool {
        self.kind() == KeyKind::Private
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    fn attrs(&self) -> &bip32::ExtendedKeyAttrs {
        match &self.material {
            KeyMaterial::Private(xprv) => xprv.attrs(),
            KeyMaterial::Public(xpub) => xpub.attrs(),
        }
    }

    pub fn depth(&self) -> u8 {
        self.attrs().depth
    }

    pub fn chain_code(&self) -> [u8; 32] {
        self.attrs().chain_code
    }

    pub fn parent_fingerprint(&self) -> [u8; 4] {
        self.attrs().parent_fingerprint
    }

    /// The index that produced this key; `0` normal for a root key.
    pub fn child_index(&self) -> ChildIndex {
        ChildIndex::from_child_number(self.attrs().child_number)
    }

    /// HASH160 prefix of the public key, as used in children's metadata.
    pub fn fingerprint(&self) -> [u8; 4] {
        match &self.material {
            KeyMaterial::Private(xprv) => xprv.public_key().fingerprint(),
            KeyMaterial::Public(xpub) => xpub.fingerprint(),
        }
    }

    /// Compressed SEC1 public key.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        match &self.material {
            KeyMaterial::Private(xprv) => xprv.public_key().to_bytes(),
            KeyMaterial::Public(xpub) => xpub.to_bytes(),
        }
    }

    /// The secp256k1 secret key, `None` for public keys.
    pub fn secret_key(&self) -> Result<Option<SecretKey>, WalletError> {
        match &self.material {
            KeyMaterial::Private(xprv) => {
                let bytes = Zeroizing::new(xprv.to_bytes());
                SecretKey::from_slice(bytes.as_ref())
                    .map(Some)
                    .map_err(|e| WalletError::DerivationFailed(e.to_string()))
            }
            KeyMaterial::Public(_) => Ok(None),
        }
    }

    /// Discard the private half. One way: the result cannot derive hardened
    /// children and cannot be turned back into a private key.
    pub fn neuter(self) -> Self {
        match self.material {
            KeyMaterial::Private(xprv) => Self {
                network: self.network,
                material: KeyMaterial::Public(xprv.public_key()),
            },
            KeyMaterial::Public(_) => self,
        }
    }

    /// Derive a single child step.
    pub fn derive_child(&self, child: ChildIndex) -> Result<Self, WalletError> {
        let depth = self.depth();
        if child.is_hardened() && !self.is_private() {
            return Err(WalletError::HardenedFromPublicKey {
                depth,
                index: child.index(),
            });
        }
        if depth == u8::MAX {
            return Err(WalletError::DepthOverflow { depth });
        }

        let number = child.to_child_number()?;
        let material = match &self.material {
            KeyMaterial::Private(xprv) => KeyMaterial::Private(
                xprv.derive_child(number)
                    .map_err(|e| WalletError::DerivationFailed(e.to_string()))?,
            ),
            KeyMaterial::Public(xpub) => KeyMaterial::Public(
                xpub.derive_child(number)
                    .map_err(|e| WalletError::DerivationFailed(e.to_string()))?,
            ),
        };
        Ok(Self {
            network: self.network,
            material,
        })
    }

    /// Apply `path` left to right.
    pub fn derive(&self, path: &DerivationPath) -> Result<Self, WalletError> {
        path.segments()
            .iter()
            .try_fold(self.clone(), |key, child| key.derive_child(*child))
    }

    /// Base58 `xpub`/`tpub` serialization.
    pub fn to_xpub_string(&self) -> String {
        let prefix = public_prefix(self.network);
        match &self.material {
            KeyMaterial::Private(xprv) => xprv.public_key().to_string(prefix),
            KeyMaterial::Public(xpub) => xpub.to_string(prefix),
        }
    }

    /// Base58 `xprv`/`tprv` serialization, `None` for public keys.
    pub fn to_xprv_string(&self) -> Option<Zeroizing<String>> {
        match &self.material {
            KeyMaterial::Private(xprv) => Some(xprv.to_string(private_prefix(self.network))),
            KeyMaterial::Public(_) => None,
        }
    }
}

fn public_prefix(network: BtcNetwork) -> Prefix {
    if network.is_mainnet() {
        Prefix::XPUB
    } else {
        Prefix::TPUB
    }
}

fn private_prefix(network: BtcNetwork) -> Prefix {
    if network.is_mainnet() {
        Prefix::XPRV
    } else {
        Prefix::TPRV
    }
}

fn parse_with_prefix(s: &str, expected: Prefix) -> Result<bip32::ExtendedKey, WalletError> {
    let parsed: bip32::ExtendedKey = s
        .trim()
        .parse()
        .map_err(|e: bip32::Error| WalletError::InvalidExtendedKey(e.to_string()))?;
    if parsed.prefix != expected {
        return Err(WalletError::InvalidExtendedKey(format!(
            "expected {} prefix, got {}",
            expected.as_str(),
            parsed.prefix.as_str()
        )));
    }
    Ok(parsed)
}

impl PartialEq for ExtendedKey {
    fn eq(&self, other: &Self) -> bool {
        let same_material = match (&self.material, &other.material) {
            (KeyMaterial::Private(a), KeyMaterial::Private(b)) => {
                Zeroizing::new(a.to_bytes()) == Zeroizing::new(b.to_bytes())
            }
            (KeyMaterial::Public(a), KeyMaterial::Public(b)) => a.to_bytes() == b.to_bytes(),
            _ => false,
        };
        let (a, b) = (self.attrs(), other.attrs());
        same_material
            && self.network == other.network
            && a.depth == b.depth
            && a.parent_fingerprint == b.parent_fingerprint
            && a.child_number == b.child_number
            && a.chain_code == b.chain_code
    }
}

impl Eq for ExtendedKey {}

impl std::fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("kind", &self.kind())
            .field("network", &self.network)
            .field("depth", &self.depth())
            .field("child", &self.child_index().to_string())
            .field("fingerprint", &hex::encode(self.fingerprint()))
            .finish_non_exhaustive()
    }
}
