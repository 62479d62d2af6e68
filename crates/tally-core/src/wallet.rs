//! The wallet context: one account key, its derived-key cache and the
//! change counter, passed explicitly through every pipeline step.

use std::collections::{BTreeSet, HashMap};

use bitcoin::secp256k1::SecretKey;
use bitcoin::{Amount, OutPoint, Txid, Witness};
use parking_lot::RwLock;
use tally_btc::amount::checked_sum;
use tally_btc::broadcast::{broadcast, Broadcaster};
use tally_btc::network::BtcNetwork;
use tally_btc::provider::UtxoProvider;
use tally_btc::serialize::{finalize, SignedTransaction};
use tally_btc::sign::{sign_all, SigningKeys};
use tally_btc::transaction::{
    build_p2wpkh_transaction, DustChangeSuppressed, FeePolicy, Payment, UnsignedBtcTx,
};
use tally_btc::utxo::{CoinSelector, KeyId, Keychain, LargestFirst, OwnedUtxo};
use tally_btc::BtcError;
use tracing::{debug, info};

use crate::address::{to_address, DerivedAddress};
use crate::config::WalletConfig;
use crate::discovery::{discover_utxos, DiscoveryRequest};
use crate::error::WalletError;
use crate::hd_derivation::{ChildIndex, DerivationPath, ExtendedKey};
use crate::mnemonic::{Mnemonic, Seed};

/// Outcome of [`Wallet::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub txid: Txid,
    pub fee: Amount,
    /// Value returned to the wallet, if a change output was created.
    pub change: Option<Amount>,
    pub dust_suppressed: Option<DustChangeSuppressed>,
}

/// A single BIP-84 account.
///
/// Holds the account-level extended key (private, or public for a
/// watch-only wallet) rather than the root, so nothing above
/// `m/84'/coin'/account'` stays in memory.
#[derive(Debug)]
pub struct Wallet {
    config: WalletConfig,
    account: ExtendedKey,
    account_path: DerivationPath,
    keys: RwLock<HashMap<KeyId, ExtendedKey>>,
    watched: BTreeSet<OutPoint>,
    next_change: u32,
}

impl Wallet {
    pub fn from_mnemonic(
        mnemonic: &Mnemonic,
        passphrase: &str,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        Self::from_seed(&mnemonic.to_seed(passphrase)?, config)
    }

    pub fn from_seed(seed: &Seed, config: WalletConfig) -> Result<Self, WalletError> {
        config.validate()?;
        let account_path = DerivationPath::bip84_account(config.network, config.account)?;
        let account = ExtendedKey::from_seed(seed, config.network)?.derive(&account_path)?;
        info!(network = %config.network, path = %account_path, "opened wallet");
        Ok(Self::with_account_key(config, account, account_path))
    }

    /// A wallet that can discover funds and build transactions but not sign.
    ///
    /// `account_xpub` is the serialized key at `m/84'/coin'/account'`.
    pub fn watch_only(account_xpub: &str, config: WalletConfig) -> Result<Self, WalletError> {
        config.validate()?;
        let account = ExtendedKey::from_xpub_str(account_xpub, config.network)?;
        if account.depth() != 3 {
            return Err(WalletError::InvalidExtendedKey(format!(
                "expected an account key at depth 3, got depth {}",
                account.depth()
            )));
        }
        let expected = ChildIndex::hardened(config.account)?;
        if account.child_index() != expected {
            return Err(WalletError::InvalidExtendedKey(format!(
                "account key has child index {}, configured account is {expected}",
                account.child_index()
            )));
        }
        let account_path = DerivationPath::bip84_account(config.network, config.account)?;
        info!(network = %config.network, path = %account_path, "opened watch-only wallet");
        Ok(Self::with_account_key(config, account, account_path))
    }

    fn with_account_key(
        config: WalletConfig,
        account: ExtendedKey,
        account_path: DerivationPath,
    ) -> Self {
        Self {
            config,
            account,
            account_path,
            keys: RwLock::new(HashMap::new()),
            watched: BTreeSet::new(),
            next_change: 0,
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn network(&self) -> BtcNetwork {
        self.config.network
    }

    pub fn account_path(&self) -> &DerivationPath {
        &self.account_path
    }

    pub fn account_xpub(&self) -> String {
        self.account.to_xpub_string()
    }

    pub fn is_watch_only(&self) -> bool {
        !self.account.is_private()
    }

    /// Index the next change address will use.
    pub fn next_change_index(&self) -> u32 {
        self.next_change
    }

    /// The extended key for `id`, derived once and cached.
    pub fn key(&self, id: KeyId) -> Result<ExtendedKey, WalletError> {
        if let Some(key) = self.keys.read().get(&id) {
            return Ok(key.clone());
        }
        let key = self.account.derive(&DerivationPath::for_key(id)?)?;
        self.keys.write().insert(id, key.clone());
        Ok(key)
    }

    /// Full path of `id` from the root.
    pub fn key_path(&self, id: KeyId) -> Result<DerivationPath, WalletError> {
        Ok(self.account_path.join(&DerivationPath::for_key(id)?))
    }

    pub fn address(&self, id: KeyId) -> Result<DerivedAddress, WalletError> {
        let key = self.key(id)?;
        Ok(DerivedAddress {
            address: to_address(&key, self.network())?,
            key: id,
            derivation_path: self.key_path(id)?,
        })
    }

    pub fn receive_address(&self, index: u32) -> Result<DerivedAddress, WalletError> {
        self.address(KeyId::external(index))
    }

    /// Every address discovery scans: `gap_limit` receive addresses and
    /// change addresses up to the larger of `gap_limit` and the next change
    /// index.
    pub fn address_pool(&self) -> Result<Vec<DerivedAddress>, WalletError> {
        let gap = self.config.gap_limit;
        let receive = (0..gap).map(KeyId::external);
        let change = (0..gap.max(self.next_change)).map(KeyId::internal);
        receive.chain(change).map(|id| self.address(id)).collect()
    }

    /// Register an outpoint for providers that can only look up single
    /// outputs.
    pub fn watch_outpoint(&mut self, outpoint: OutPoint) {
        self.watched.insert(outpoint);
    }

    pub fn watched(&self) -> &BTreeSet<OutPoint> {
        &self.watched
    }

    /// Find the wallet's spendable outputs.
    ///
    /// Advances the change counter past any change index found holding
    /// funds.
    pub fn discover(
        &mut self,
        provider: &dyn UtxoProvider,
        best_height: Option<u32>,
    ) -> Result<Vec<OwnedUtxo>, WalletError> {
        let pool = self.address_pool()?;
        let utxos = discover_utxos(
            provider,
            DiscoveryRequest {
                addresses: &pool,
                watched: &self.watched,
                best_height,
                max_lag: self.config.max_provider_lag,
            },
        )?;

        if let Some(highest) = utxos
            .iter()
            .filter(|owned| owned.key.keychain == Keychain::Internal)
            .map(|owned| owned.key.index)
            .max()
        {
            self.next_change = self.next_change.max(highest.saturating_add(1));
        }
        Ok(utxos)
    }

    /// A change address never handed out before.
    pub fn next_change_address(&mut self) -> Result<DerivedAddress, WalletError> {
        let address = self.address(KeyId::internal(self.next_change))?;
        self.next_change += 1;
        Ok(address)
    }

    /// Select, then build an unsigned transaction paying `payments`.
    ///
    /// For rate-based fees selection is repeated until the fee estimate
    /// matches the number of inputs actually selected. The change index is
    /// consumed only if a change output was created.
    pub fn create_transaction(
        &mut self,
        available: &[OwnedUtxo],
        payments: &[Payment],
        fee_policy: FeePolicy,
        selector: &dyn CoinSelector,
    ) -> Result<UnsignedBtcTx, WalletError> {
        let network = self.network().to_bitcoin_network();
        if let Some(foreign) = payments
            .iter()
            .find(|p| !p.address.as_unchecked().is_valid_for_network(network))
        {
            return Err(BtcError::InvalidAddress(format!(
                "{} is not valid on {}",
                foreign.address,
                self.network()
            ))
            .into());
        }

        let payment_total = checked_sum(payments.iter().map(|p| p.amount))?;
        let mut assumed_inputs = 1;
        let selection = loop {
            let fee = fee_policy.fee_for(assumed_inputs, payments.len());
            let target = payment_total
                .checked_add(fee)
                .ok_or_else(|| BtcError::InvalidAmount("payment plus fee overflows".into()))?;
            let selection = selector.select(available, target)?;
            if selection.selected.len() <= assumed_inputs {
                break selection;
            }
            debug!(
                assumed = assumed_inputs,
                selected = selection.selected.len(),
                "fee estimate grew with input count, reselecting"
            );
            assumed_inputs = selection.selected.len();
        };

        let change = self.address(KeyId::internal(self.next_change))?;
        let unsigned = build_p2wpkh_transaction(
            &selection,
            payments,
            fee_policy,
            &change.address,
            self.config.dust_threshold(),
        )?;
        if unsigned.change_index.is_some() {
            self.next_change += 1;
        }
        Ok(unsigned)
    }

    /// One witness per input, each signed by the key that owns that input.
    pub fn sign(&self, unsigned: &UnsignedBtcTx) -> Result<Vec<Witness>, WalletError> {
        Ok(sign_all(unsigned, self)?)
    }

    pub fn sign_and_finalize(
        &self,
        unsigned: UnsignedBtcTx,
    ) -> Result<SignedTransaction, WalletError> {
        let witnesses = self.sign(&unsigned)?;
        Ok(finalize(unsigned, witnesses)?)
    }

    /// Discover, select, build, sign, finalize and broadcast.
    ///
    /// Spent outpoints stop being watched and the change output, if any,
    /// starts being watched once the relay has accepted the transaction.
    pub fn send(
        &mut self,
        provider: &dyn UtxoProvider,
        broadcaster: &dyn Broadcaster,
        payments: &[Payment],
        best_height: Option<u32>,
    ) -> Result<SendReport, WalletError> {
        let available = self.discover(provider, best_height)?;
        let unsigned =
            self.create_transaction(&available, payments, self.config.fee, &LargestFirst)?;

        let fee = unsigned.fee;
        let dust_suppressed = unsigned.dust_suppressed;
        let change = unsigned
            .change_index
            .map(|i| (i, unsigned.tx.output[i].value));
        let spent: Vec<OutPoint> = unsigned
            .tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .collect();

        let signed = self.sign_and_finalize(unsigned)?;
        let txid = broadcast(broadcaster, &signed)?;

        for outpoint in &spent {
            self.watched.remove(outpoint);
        }
        if let Some((vout, _)) = change {
            self.watched.insert(OutPoint::new(txid, vout as u32));
        }

        info!(%txid, fee_sat = fee.to_sat(), inputs = spent.len(), "payment sent");
        Ok(SendReport {
            txid,
            fee,
            change: change.map(|(_, value)| value),
            dust_suppressed,
        })
    }
}

impl SigningKeys for Wallet {
    fn secret_key(&self, key: KeyId) -> Result<Option<SecretKey>, BtcError> {
        if self.is_watch_only() {
            return Ok(None);
        }
        let derived = self.key(key).map_err(|e| match e {
            WalletError::Btc(inner) => inner,
            other => BtcError::SigningError(other.to_string()),
        })?;
        derived
            .secret_key()
            .map_err(|e| BtcError::SigningError(e.to_string()))
    }
}
