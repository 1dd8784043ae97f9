use ruint::aliases::U256;

/// Pool fees are expressed as a 64 bit fraction of this denominator.
pub const FEE_DENOMINATOR: U256 = U256::from_limbs([0, 1, 0, 0]);

pub const FEE_BITS: u8 = 64;

/// Computes `ceil(amount * fee / 2**64)`.
pub fn compute_fee(amount: u128, fee: u64) -> u128 {
    let num = U256::from(amount) * U256::from(fee);
    let (quotient, remainder) = num.div_rem(FEE_DENOMINATOR);

    let unrounded = u128::try_from(quotient).expect("fee quotient should not exceed u128");
    if remainder.is_zero() {
        unrounded
    } else {
        unrounded + 1
    }
}
