use bitcoin::Txid;
use tracing::{info, warn};

use crate::error::BtcError;
use crate::serialize::SignedTransaction;

/// Submits raw transactions to the network.
///
/// Rejections (fee too low, double spend, malformed) come back as
/// [`BtcError::BroadcastRejected`] with the relay's reason verbatim.
pub trait Broadcaster: Send + Sync {
    fn submit(&self, raw_tx: &[u8]) -> Result<Txid, BtcError>;
}

/// Submit `signed` once and return the txid reported by the relay.
pub fn broadcast(broadcaster: &dyn Broadcaster, signed: &SignedTransaction) -> Result<Txid, BtcError> {
    let expected = signed.txid();
    let txid = broadcaster.submit(&signed.encode())?;
    if txid != expected {
        warn!(%expected, reported = %txid, "relay reported a different txid");
    }
    info!(%txid, vsize = signed.vsize(), "transaction broadcast");
    Ok(txid)
}
