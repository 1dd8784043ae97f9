use ruint::aliases::U256;

use crate::types::TokenAmount;

/// Result of one exact-input swap. `consumed_amount` is what the pool took
/// of the input token (at most the offered amount when a price limit cuts
/// the swap short) and `calculated_amount` is the output paid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwapDelta {
    pub consumed_amount: i128,
    pub calculated_amount: i128,
}

/// The underlying market the virtual orders trade against. Price movement
/// math and limit clamping live behind this trait, so the execution loop
/// never reasons about liquidity or ticks.
pub trait AmmCore {
    type Error;

    /// Current price as a square root ratio, X128 fixed point, quoting
    /// token1 per token0.
    fn sqrt_ratio(&self) -> U256;

    /// The price the pool converges toward when both sides sell
    /// continuously for `time_elapsed` seconds at the given rates.
    fn target_sqrt_ratio(
        &self,
        token0_sale_rate: u128,
        token1_sale_rate: u128,
        time_elapsed: u32,
        fee: u64,
    ) -> Result<U256, Self::Error>;

    /// Executes an exact input swap of `amount.token`. When a limit is
    /// given the swap stops once the price reaches it and reports a
    /// partially consumed input.
    fn swap(
        &mut self,
        amount: TokenAmount,
        sqrt_ratio_limit: Option<U256>,
    ) -> Result<SwapDelta, Self::Error>;
}

/// Deferred token movements recorded against the environment's flash
/// accounting. Balances net out when the surrounding transaction settles.
pub trait SettlementLedger {
    fn credit(&mut self, account: U256, token: U256, amount: u128);
    fn debit(&mut self, account: U256, token: U256, amount: u128);
}
