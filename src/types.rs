use ruint::aliases::U256;
use thiserror::Error;

/// Unique key identifying a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolKey {
    pub token0: U256,
    pub token1: U256,
    /// Swap fee as a fraction of 2**64.
    pub fee: u64,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Error)]
pub enum PoolKeyError {
    /// Token0 must be less than token1.
    #[error("token0 must be less than token1")]
    TokenOrderInvalid,
}

/// Validates the `token0 < token1` invariant.
pub fn ensure_valid_token_order(key: &PoolKey) -> Result<(), PoolKeyError> {
    if key.token0 < key.token1 {
        Ok(())
    } else {
        Err(PoolKeyError::TokenOrderInvalid)
    }
}

/// Identifies a continuous sale order over `[start_time, end_time)` selling
/// one side of a pool for the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderKey {
    pub pool: PoolKey,
    pub owner: U256,
    pub salt: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub is_token1: bool,
}

impl OrderKey {
    /// The token this order sells.
    pub fn sell_token(&self) -> U256 {
        if self.is_token1 {
            self.pool.token1
        } else {
            self.pool.token0
        }
    }

    /// The token this order purchases.
    pub fn buy_token(&self) -> U256 {
        if self.is_token1 {
            self.pool.token0
        } else {
            self.pool.token1
        }
    }
}

// Amount and token information.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TokenAmount {
    pub amount: i128,
    pub token: U256,
}
