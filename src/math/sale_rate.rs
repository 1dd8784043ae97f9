use ruint::aliases::U256;
use thiserror::Error;

/// Maximum representable sale rate, an 80.32 fixed point value bounded to 112 bits.
pub const MAX_SALE_RATE: u128 = (1 << 112) - 1;

/// Maximum magnitude of the net sale rate delta accumulated at a single timestamp.
pub const MAX_SALE_RATE_DELTA: i128 = (1 << 111) - 1;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Error)]
pub enum SaleRateError {
    #[error("sale rate overflow")]
    RateOverflow,
    #[error("sale rate underflow")]
    RateUnderflow,
    #[error("max sale rate delta magnitude exceeded")]
    MaxRateDeltaExceeded,
}

/// Computes the absolute token amount sold over `duration` seconds at the given
/// 80.32 fixed point rate, truncating or rounding up the fractional part.
pub fn amount_from_sale_rate(rate: u128, duration: u32, round_up: bool) -> u128 {
    let mut scaled = U256::from(rate) * U256::from(duration);
    if round_up {
        scaled += U256::from(u32::MAX);
    }
    // a 128 bit rate times a 32 bit duration shifted down 32 bits always fits in 128 bits
    u128::try_from(scaled >> 32).expect("sale amount fits in u128")
}

/// Applies a signed rate change to an aggregate sale rate.
pub fn add_sale_rate_delta(rate: u128, delta: i128) -> Result<u128, SaleRateError> {
    let updated = if delta < 0 {
        rate.checked_sub(delta.unsigned_abs())
            .ok_or(SaleRateError::RateUnderflow)?
    } else {
        rate.checked_add(delta.unsigned_abs())
            .ok_or(SaleRateError::RateOverflow)?
    };

    if updated > MAX_SALE_RATE {
        return Err(SaleRateError::RateOverflow);
    }

    Ok(updated)
}

/// Accumulates a rate change into the net delta already registered at a
/// timestamp, bounding the result's magnitude.
pub fn constrain_rate_delta(existing: i128, change: i128) -> Result<i128, SaleRateError> {
    let updated = existing
        .checked_add(change)
        .ok_or(SaleRateError::MaxRateDeltaExceeded)?;

    if updated.unsigned_abs() > MAX_SALE_RATE_DELTA.unsigned_abs() {
        return Err(SaleRateError::MaxRateDeltaExceeded);
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod amount_from_sale_rate {
        use super::*;

        #[test]
        fn whole_rate_is_exact() {
            assert_eq!(amount_from_sale_rate(1 << 32, 100, false), 100);
            assert_eq!(amount_from_sale_rate(1 << 32, 100, true), 100);
        }

        #[test]
        fn fractional_rate_truncates() {
            assert_eq!(amount_from_sale_rate(1, 1, false), 0);
            assert_eq!(amount_from_sale_rate(1, 1, true), 1);
        }

        #[test]
        fn half_unit_rate() {
            assert_eq!(amount_from_sale_rate((3 << 32) + (1 << 31), 2, false), 7);
            assert_eq!(amount_from_sale_rate((3 << 32) + (1 << 31), 3, false), 10);
            assert_eq!(amount_from_sale_rate((3 << 32) + (1 << 31), 3, true), 11);
        }

        #[test]
        fn zero_duration() {
            assert_eq!(amount_from_sale_rate(MAX_SALE_RATE, 0, false), 0);
            assert_eq!(amount_from_sale_rate(MAX_SALE_RATE, 0, true), 0);
        }

        #[test]
        fn max_rate_max_duration() {
            assert_eq!(
                amount_from_sale_rate(MAX_SALE_RATE, u32::MAX, true),
                (1 << 112) - (1 << 80)
            );
            assert_eq!(
                amount_from_sale_rate(MAX_SALE_RATE, u32::MAX, false),
                (1 << 112) - (1 << 80) - 1
            );
        }

        #[test]
        fn round_up_exceeds_round_down_by_at_most_one() {
            for rate in [1, 3, (1 << 32) - 1, (1 << 32) + 1, MAX_SALE_RATE] {
                for duration in [1, 7, 100, u32::MAX] {
                    let down = amount_from_sale_rate(rate, duration, false);
                    let up = amount_from_sale_rate(rate, duration, true);
                    assert!(up >= down);
                    assert!(up - down <= 1);
                }
            }
        }
    }

    mod add_sale_rate_delta {
        use super::*;

        #[test]
        fn positive_delta() {
            assert_eq!(add_sale_rate_delta(0, 5), Ok(5));
            assert_eq!(
                add_sale_rate_delta(0, MAX_SALE_RATE as i128),
                Ok(MAX_SALE_RATE)
            );
        }

        #[test]
        fn negative_delta() {
            assert_eq!(add_sale_rate_delta(5, -5), Ok(0));
            assert_eq!(add_sale_rate_delta(MAX_SALE_RATE, -1), Ok(MAX_SALE_RATE - 1));
        }

        #[test]
        fn underflow() {
            assert_eq!(
                add_sale_rate_delta(0, -1),
                Err(SaleRateError::RateUnderflow)
            );
            assert_eq!(
                add_sale_rate_delta(1, i128::MIN),
                Err(SaleRateError::RateUnderflow)
            );
        }

        #[test]
        fn overflow() {
            assert_eq!(
                add_sale_rate_delta(MAX_SALE_RATE, 1),
                Err(SaleRateError::RateOverflow)
            );
            assert_eq!(
                add_sale_rate_delta(u128::MAX, 0),
                Err(SaleRateError::RateOverflow)
            );
        }
    }

    mod constrain_rate_delta {
        use super::*;

        #[test]
        fn within_bounds() {
            assert_eq!(constrain_rate_delta(0, 5), Ok(5));
            assert_eq!(constrain_rate_delta(5, -10), Ok(-5));
            assert_eq!(
                constrain_rate_delta(0, MAX_SALE_RATE_DELTA),
                Ok(MAX_SALE_RATE_DELTA)
            );
            assert_eq!(
                constrain_rate_delta(MAX_SALE_RATE_DELTA, -MAX_SALE_RATE_DELTA),
                Ok(0)
            );
        }

        #[test]
        fn magnitude_exceeded() {
            assert_eq!(
                constrain_rate_delta(1, MAX_SALE_RATE_DELTA),
                Err(SaleRateError::MaxRateDeltaExceeded)
            );
            assert_eq!(
                constrain_rate_delta(-MAX_SALE_RATE_DELTA, -1),
                Err(SaleRateError::MaxRateDeltaExceeded)
            );
        }

        #[test]
        fn i128_overflow() {
            assert_eq!(
                constrain_rate_delta(i128::MAX, 1),
                Err(SaleRateError::MaxRateDeltaExceeded)
            );
            assert_eq!(
                constrain_rate_delta(i128::MIN, -1),
                Err(SaleRateError::MaxRateDeltaExceeded)
            );
        }
    }
}
