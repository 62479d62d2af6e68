//! UTXO discovery against a [`UtxoProvider`].
//!
//! Address-scoped providers are queried for every wallet address
//! concurrently. Providers that only answer per outpoint are asked about the
//! outpoints the wallet has registered. Either way every returned output is
//! checked against the wallet's own scripts and tagged with its owning key
//! before it reaches selection.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitcoin::{OutPoint, ScriptBuf};
use rayon::prelude::*;
use tally_btc::provider::{ensure_fresh, UtxoProvider};
use tally_btc::utxo::{KeyId, OwnedUtxo};
use tally_btc::BtcError;
use tracing::{debug, info, warn};

use crate::address::DerivedAddress;
use crate::error::WalletError;

/// What discovery needs to know about the wallet and the chain tip.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryRequest<'a> {
    pub addresses: &'a [DerivedAddress],
    pub watched: &'a BTreeSet<OutPoint>,
    pub best_height: Option<u32>,
    pub max_lag: u32,
}

/// Spendable outputs owned by the wallet, ordered by outpoint.
pub fn discover_utxos(
    provider: &dyn UtxoProvider,
    request: DiscoveryRequest<'_>,
) -> Result<Vec<OwnedUtxo>, WalletError> {
    let caps = provider.capabilities();

    if caps.by_address {
        match by_address(provider, &request) {
            Ok(found) => return Ok(found),
            Err(BtcError::UnsupportedQuery(shape)) if caps.by_outpoint => {
                debug!(shape, "address query refused, falling back to outpoint lookups");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if caps.by_outpoint {
        return Ok(by_outpoint(provider, &request)?);
    }

    Err(BtcError::UnsupportedQuery("by-address or by-outpoint").into())
}

fn by_address(
    provider: &dyn UtxoProvider,
    request: &DiscoveryRequest<'_>,
) -> Result<Vec<OwnedUtxo>, BtcError> {
    let batches = request
        .addresses
        .par_iter()
        .map(|derived| {
            let snapshot = provider.list_unspent(&derived.address)?;
            ensure_fresh(snapshot.synced_height, request.best_height, request.max_lag)?;
            let script = derived.script_pubkey();
            snapshot
                .data
                .into_iter()
                .map(|utxo| {
                    if utxo.script_pubkey != script {
                        return Err(BtcError::MalformedUtxo(format!(
                            "output {} listed for {} has a foreign script",
                            utxo.outpoint, derived.address
                        )));
                    }
                    Ok(OwnedUtxo { utxo, key: derived.key })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, BtcError>>()?;

    let found = dedupe(batches.into_iter().flatten());
    info!(
        addresses = request.addresses.len(),
        utxos = found.len(),
        "discovered utxos by address"
    );
    Ok(found)
}

fn by_outpoint(
    provider: &dyn UtxoProvider,
    request: &DiscoveryRequest<'_>,
) -> Result<Vec<OwnedUtxo>, BtcError> {
    let owners: HashMap<ScriptBuf, KeyId> = request
        .addresses
        .iter()
        .map(|derived| (derived.script_pubkey(), derived.key))
        .collect();
    let outpoints: Vec<OutPoint> = request.watched.iter().copied().collect();

    let found = outpoints
        .par_iter()
        .map(|outpoint| {
            let snapshot = provider.get_output(outpoint)?;
            ensure_fresh(snapshot.synced_height, request.best_height, request.max_lag)?;
            let Some(utxo) = snapshot.data else {
                debug!(%outpoint, "watched output spent or unknown");
                return Ok(None);
            };
            if utxo.outpoint != *outpoint {
                return Err(BtcError::MalformedUtxo(format!(
                    "asked for {outpoint}, provider answered {}",
                    utxo.outpoint
                )));
            }
            match owners.get(&utxo.script_pubkey) {
                Some(key) => Ok(Some(OwnedUtxo { utxo, key: *key })),
                None => {
                    warn!(%outpoint, "watched output is not locked to a wallet address, skipping");
                    Ok(None)
                }
            }
        })
        .collect::<Result<Vec<_>, BtcError>>()?;

    let found = dedupe(found.into_iter().flatten());
    info!(
        watched = outpoints.len(),
        utxos = found.len(),
        "discovered utxos by outpoint"
    );
    Ok(found)
}

fn dedupe(utxos: impl Iterator<Item = OwnedUtxo>) -> Vec<OwnedUtxo> {
    utxos
        .map(|owned| (owned.utxo.outpoint, owned))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}
