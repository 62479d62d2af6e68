//! Exact conversion of external amount representations into satoshis.
//!
//! Values inside the engine are always integer satoshis (`bitcoin::Amount`).
//! Indexers sometimes report values as fractional coins; those are converted
//! here, once, at ingestion. A value that cannot be represented exactly is an
//! error, never rounded.

use bitcoin::{Amount, Denomination};

use crate::error::BtcError;

/// Convert a fractional-coin `f64` into an exact satoshi amount.
///
/// Uses the shortest decimal rendering of the float, so `0.00142448` converts
/// to `142448` sat, while `0.1 + 0.2` (`0.30000000000000004`) is rejected as
/// too precise.
pub fn sats_from_btc_f64(value: f64) -> Result<Amount, BtcError> {
    if !value.is_finite() {
        return Err(BtcError::InvalidAmount(format!("non-finite amount: {value}")));
    }
    if value < 0.0 {
        return Err(BtcError::InvalidAmount(format!("negative amount: {value}")));
    }
    if value == 0.0 {
        return Ok(Amount::ZERO);
    }
    sats_from_btc_str(&value.to_string())
}

/// Convert a decimal-coin string (e.g. `"0.00142448"`) into satoshis.
pub fn sats_from_btc_str(value: &str) -> Result<Amount, BtcError> {
    Amount::from_str_in(value.trim(), Denomination::Bitcoin)
        .map_err(|e| BtcError::InvalidAmount(format!("cannot convert {value:?} BTC exactly: {e}")))
}

/// Convert a signed satoshi count, rejecting negatives.
pub fn sats_from_i64(value: i64) -> Result<Amount, BtcError> {
    u64::try_from(value)
        .map(Amount::from_sat)
        .map_err(|_| BtcError::InvalidAmount(format!("negative amount: {value} sat")))
}

/// Sum amounts, failing on overflow instead of wrapping.
pub fn checked_sum<I>(amounts: I) -> Result<Amount, BtcError>
where
    I: IntoIterator<Item = Amount>,
{
    amounts.into_iter().try_fold(Amount::ZERO, |acc, a| {
        acc.checked_add(a)
            .ok_or_else(|| BtcError::InvalidAmount("amount sum overflows".into()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_with_eight_decimals_converts_exactly() {
        assert_eq!(sats_from_btc_f64(0.00142448).unwrap(), Amount::from_sat(142_448));
        assert_eq!(sats_from_btc_f64(1.0).unwrap(), Amount::from_sat(100_000_000));
        assert_eq!(sats_from_btc_f64(0.00000001).unwrap(), Amount::from_sat(1));
    }

    #[test]
    fn float_artifact_is_rejected_not_rounded() {
        let err = sats_from_btc_f64(0.1 + 0.2).unwrap_err();
        assert!(matches!(err, BtcError::InvalidAmount(_)));
    }

    #[test]
    fn sub_satoshi_precision_is_rejected() {
        assert!(sats_from_btc_f64(0.000000001).is_err());
        assert!(sats_from_btc_str("0.123456789").is_err());
    }

    #[test]
    fn negative_and_non_finite_are_rejected() {
        assert!(sats_from_btc_f64(-0.5).is_err());
        assert!(sats_from_btc_f64(f64::NAN).is_err());
        assert!(sats_from_btc_f64(f64::INFINITY).is_err());
        assert!(sats_from_btc_str("-0.1").is_err());
        assert!(sats_from_i64(-1).is_err());
    }

    #[test]
    fn zero_is_zero() {
        assert_eq!(sats_from_btc_f64(0.0).unwrap(), Amount::ZERO);
        assert_eq!(sats_from_btc_f64(-0.0).unwrap(), Amount::ZERO);
    }

    #[test]
    fn decimal_string_converts() {
        assert_eq!(sats_from_btc_str(" 0.0000052 ").unwrap(), Amount::from_sat(520));
        assert_eq!(sats_from_i64(142_448).unwrap(), Amount::from_sat(142_448));
    }

    #[test]
    fn checked_sum_detects_overflow() {
        let total = checked_sum([Amount::from_sat(1), Amount::from_sat(2)]).unwrap();
        assert_eq!(total, Amount::from_sat(3));
        assert!(checked_sum([Amount::MAX, Amount::from_sat(1)]).is_err());
    }
}
