use alloc::collections::BTreeMap;
use core::cmp::{max, min};
use core::convert::Infallible;
use derive_more::{Add, AddAssign, Sub, SubAssign};
use num_traits::{ToPrimitive, Zero};
use ruint::aliases::U256;
use thiserror::Error;

use crate::amm::{AmmCore, SettlementLedger};
use crate::math::fee::compute_fee;
use crate::math::muldiv::muldiv;
use crate::math::sale_rate::{add_sale_rate_delta, amount_from_sale_rate, SaleRateError};
use crate::state::{OrderState, PoolTwamm};
use crate::types::{ensure_valid_token_order, OrderKey, PoolKey, PoolKeyError, TokenAmount};

const X128: U256 = U256::from_limbs([0, 0, 1, 0]);

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Error)]
pub enum PoolInitializationError {
    #[error("invalid pool key")]
    InvalidPoolKey(#[from] PoolKeyError),
    #[error("pool is already initialized")]
    PoolAlreadyInitialized,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Error)]
pub enum TwammError<E = Infallible> {
    #[error("pool is not initialized")]
    PoolNotInitialized,
    #[error("execution time exceeds block time")]
    ExecutionTimeExceedsBlockTime,
    #[error("too much time passed since last execution")]
    TooMuchTimePassedSinceLastExecution,
    #[error("sale amount overflow")]
    SaleAmountOverflow,
    #[error("swap delta is invalid")]
    InvalidSwapDelta,
    #[error("order timestamps are invalid")]
    InvalidTimestamps,
    #[error("order has already ended")]
    OrderAlreadyEnded,
    #[error("proceeds must be collected before canceling")]
    MustCollectProceedsBeforeCanceling,
    #[error("invalid sale rate")]
    SaleRate(#[from] SaleRateError),
    #[error("invalid pool key")]
    PoolKey(#[from] PoolKeyError),
    #[error("amm core error")]
    Core(E),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Add, AddAssign, Sub, SubAssign)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionResources {
    /// The number of seconds that passed since the last virtual order execution
    pub virtual_order_seconds_executed: u64,
    /// The amount of order updates that were applied to the sale rate
    pub virtual_order_delta_times_crossed: u32,
    /// Whether the virtual orders were executed or not (for a single call, 1 or 0)
    pub virtual_orders_executed: u32,
}

/// Outcome of a sale rate change. A positive `amount` is owed by the order
/// owner, a negative amount is refunded net of `fee`. The same movements are
/// recorded against the settlement ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SaleRateUpdate {
    pub sale_rate: u128,
    pub amount: TokenAmount,
    pub fee: u128,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderStatus {
    pub sale_rate: u128,
    pub amount_sold: u128,
    pub remaining_sell_amount: u128,
    pub purchased_amount: u128,
}

/// Registry of TWAMM pools and their continuous sale orders. Virtual orders
/// trade against an [`AmmCore`] and token movements net out through a
/// [`SettlementLedger`], with the engine's own address as escrow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TwammEngine {
    address: U256,
    pools: BTreeMap<PoolKey, PoolTwamm>,
    orders: BTreeMap<OrderKey, OrderState>,
}

impl TwammEngine {
    pub fn new(address: U256) -> Self {
        TwammEngine {
            address,
            ..Default::default()
        }
    }

    pub fn pool(&self, key: &PoolKey) -> Option<&PoolTwamm> {
        self.pools.get(key)
    }

    pub fn order(&self, key: &OrderKey) -> Option<&OrderState> {
        self.orders.get(key)
    }

    pub fn initialize_pool(
        &mut self,
        key: PoolKey,
        now: u64,
    ) -> Result<(), PoolInitializationError> {
        ensure_valid_token_order(&key)?;
        if self.pools.contains_key(&key) {
            return Err(PoolInitializationError::PoolAlreadyInitialized);
        }
        self.pools.insert(key, PoolTwamm::new(now));
        Ok(())
    }

    /// Executes all virtual orders of the pool from its last execution time
    /// through `now`, segment by segment between scheduled boundaries. Pool
    /// state is committed only when the whole run succeeds; swaps already
    /// applied to `core` are rolled back by the surrounding transaction.
    pub fn execute_virtual_orders<A: AmmCore, L: SettlementLedger>(
        &mut self,
        key: PoolKey,
        core: &mut A,
        ledger: &mut L,
        now: u64,
    ) -> Result<ExecutionResources, TwammError<A::Error>> {
        let pool = self
            .pools
            .get_mut(&key)
            .ok_or(TwammError::PoolNotInitialized)?;

        let mut time = pool.state.last_execution_time;
        if now < time {
            return Err(TwammError::ExecutionTimeExceedsBlockTime);
        }

        let mut work = pool.clone();
        let mut resources = ExecutionResources::default();
        if time != now {
            resources.virtual_orders_executed = 1;
        }

        while time != now {
            let next_time = work.bitmap.next_scheduled(time, now).unwrap_or(now);

            let time_elapsed = next_time - time;
            if time_elapsed > u32::MAX.into() {
                return Err(TwammError::TooMuchTimePassedSinceLastExecution);
            }
            let time_elapsed = time_elapsed as u32;
            resources.virtual_order_seconds_executed += u64::from(time_elapsed);

            let amount0 = amount_from_sale_rate(work.state.token0_sale_rate, time_elapsed, false);
            let amount1 = amount_from_sale_rate(work.state.token1_sale_rate, time_elapsed, false);

            if amount0 > 0 && amount1 > 0 {
                let current_sqrt_ratio = core.sqrt_ratio();
                let target_sqrt_ratio = core
                    .target_sqrt_ratio(
                        work.state.token0_sale_rate,
                        work.state.token1_sale_rate,
                        time_elapsed,
                        key.fee,
                    )
                    .map_err(TwammError::Core)?;

                let (is_token1, amount) = if current_sqrt_ratio < target_sqrt_ratio {
                    (true, amount1)
                } else {
                    (false, amount0)
                };
                let (token_in, token_out) = if is_token1 {
                    (key.token1, key.token0)
                } else {
                    (key.token0, key.token1)
                };

                let delta = core
                    .swap(
                        TokenAmount {
                            amount: to_swap_amount(amount)?,
                            token: token_in,
                        },
                        Some(target_sqrt_ratio),
                    )
                    .map_err(TwammError::Core)?;
                let (consumed, calculated) = settled_amounts(delta, amount)?;

                if !consumed.is_zero() {
                    ledger.debit(self.address, token_in, consumed);
                }
                if !calculated.is_zero() {
                    ledger.credit(self.address, token_out, calculated);
                }

                // the sold amounts cross against each other first; only the
                // net imbalance moved through the swap. Each side is paid
                // the opposite side's crossed amount plus its share of the
                // swap proceeds.
                if is_token1 {
                    work.rewards
                        .accrue(true, amount0, work.state.token1_sale_rate);
                    work.rewards
                        .accrue(true, calculated, work.state.token1_sale_rate);
                    work.rewards
                        .accrue(false, amount1 - consumed, work.state.token0_sale_rate);
                } else {
                    work.rewards
                        .accrue(false, amount1, work.state.token0_sale_rate);
                    work.rewards
                        .accrue(false, calculated, work.state.token0_sale_rate);
                    work.rewards
                        .accrue(true, amount0 - consumed, work.state.token1_sale_rate);
                }
            } else if amount0 > 0 || amount1 > 0 {
                let (amount, is_token1) = if amount0 != 0 {
                    (amount0, false)
                } else {
                    (amount1, true)
                };
                let (token_in, token_out) = if is_token1 {
                    (key.token1, key.token0)
                } else {
                    (key.token0, key.token1)
                };

                let delta = core
                    .swap(
                        TokenAmount {
                            amount: to_swap_amount(amount)?,
                            token: token_in,
                        },
                        None,
                    )
                    .map_err(TwammError::Core)?;
                let (consumed, calculated) = settled_amounts(delta, amount)?;

                if !consumed.is_zero() {
                    ledger.debit(self.address, token_in, consumed);
                }
                if !calculated.is_zero() {
                    ledger.credit(self.address, token_out, calculated);
                }

                work.rewards.accrue(
                    is_token1,
                    calculated,
                    work.state.sale_rate_for_side(is_token1),
                );
            }

            if let Some(info) = work.time_infos.remove(&next_time) {
                work.state.token0_sale_rate =
                    add_sale_rate_delta(work.state.token0_sale_rate, info.sale_rate_delta0)?;
                work.state.token1_sale_rate =
                    add_sale_rate_delta(work.state.token1_sale_rate, info.sale_rate_delta1)?;
                work.rewards.snapshot_before(next_time);
                work.bitmap.flip(next_time);
                resources.virtual_order_delta_times_crossed += 1;
            }

            time = next_time;
        }

        work.state.last_execution_time = now;
        *pool = work;
        Ok(resources)
    }

    /// Changes an order's sale rate by `rate_delta`, creating the order when
    /// it does not exist yet and canceling it when the rate reaches zero.
    /// Runs virtual order execution through `now` first so all reward
    /// counters are authoritative.
    pub fn update_sale_rate<A: AmmCore, L: SettlementLedger>(
        &mut self,
        order_key: OrderKey,
        rate_delta: i128,
        core: &mut A,
        ledger: &mut L,
        now: u64,
    ) -> Result<SaleRateUpdate, TwammError<A::Error>> {
        ensure_valid_token_order(&order_key.pool)?;
        validate_order_window(&order_key, now)?;

        self.execute_virtual_orders(order_key.pool, core, ledger, now)?;

        let mut order = self
            .orders
            .get(&order_key)
            .copied()
            .unwrap_or_default();
        let old_rate = order.sale_rate;
        let new_rate = add_sale_rate_delta(old_rate, rate_delta)?;

        let pool = self
            .pools
            .get(&order_key.pool)
            .ok_or(TwammError::PoolNotInitialized)?;
        let mut work = pool.clone();

        let inside = work
            .rewards
            .rate_inside(order_key.start_time, order_key.end_time, now)
            .for_side(order_key.is_token1);
        let uncollected = uncollected_proceeds(old_rate, inside, order.reward_rate_snapshot)?;
        if new_rate.is_zero() && !uncollected.is_zero() {
            return Err(TwammError::MustCollectProceedsBeforeCanceling);
        }

        order.amount_sold = accrued_amount_sold(&order, &order_key, now);
        order.last_update_time = now;
        order.sale_rate = new_rate;
        order.reward_rate_snapshot = if new_rate.is_zero() {
            inside
        } else {
            // re-encode so the uncollected proceeds survive the rate change
            inside - (U256::from(uncollected) << 128) / U256::from(new_rate)
        };

        let order_count_change: i32 = match (old_rate.is_zero(), new_rate.is_zero()) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        };

        if order_key.start_time > now {
            work.adjust_boundary(
                order_key.start_time,
                order_key.is_token1,
                rate_delta,
                order_count_change,
            )?;
        } else {
            let side_rate = work.state.sale_rate_for_side(order_key.is_token1);
            let adjusted = add_sale_rate_delta(side_rate, rate_delta)?;
            if order_key.is_token1 {
                work.state.token1_sale_rate = adjusted;
            } else {
                work.state.token0_sale_rate = adjusted;
            }
        }
        work.adjust_boundary(
            order_key.end_time,
            order_key.is_token1,
            -rate_delta,
            order_count_change,
        )?;

        // bounded by the window validation above
        let remaining = (order_key.end_time - max(order_key.start_time, now)) as u32;
        let new_amount = amount_from_sale_rate(new_rate, remaining, true);
        let old_amount = amount_from_sale_rate(old_rate, remaining, true);

        let sell_token = order_key.sell_token();
        let (amount, fee) = if new_amount >= old_amount {
            let owed = new_amount - old_amount;
            if !owed.is_zero() {
                ledger.debit(order_key.owner, sell_token, owed);
                ledger.credit(self.address, sell_token, owed);
            }
            (
                owed.to_i128().ok_or(TwammError::SaleAmountOverflow)?,
                0u128,
            )
        } else {
            let refund = old_amount - new_amount;
            let fee = compute_fee(refund, order_key.pool.fee);
            let net = refund - fee;
            if !net.is_zero() {
                ledger.debit(self.address, sell_token, net);
                ledger.credit(order_key.owner, sell_token, net);
            }
            (
                -net.to_i128().ok_or(TwammError::SaleAmountOverflow)?,
                fee,
            )
        };

        self.pools.insert(order_key.pool, work);
        self.orders.insert(order_key, order);

        Ok(SaleRateUpdate {
            sale_rate: new_rate,
            amount: TokenAmount {
                amount,
                token: sell_token,
            },
            fee,
        })
    }

    /// Pays out everything the order has purchased so far and advances its
    /// reward snapshot. Orders may collect at any time, including after the
    /// order has ended.
    pub fn collect_proceeds<A: AmmCore, L: SettlementLedger>(
        &mut self,
        order_key: OrderKey,
        core: &mut A,
        ledger: &mut L,
        now: u64,
    ) -> Result<u128, TwammError<A::Error>> {
        ensure_valid_token_order(&order_key.pool)?;

        self.execute_virtual_orders(order_key.pool, core, ledger, now)?;

        let Some(mut order) = self.orders.get(&order_key).copied() else {
            return Ok(0);
        };

        let pool = self
            .pools
            .get(&order_key.pool)
            .ok_or(TwammError::PoolNotInitialized)?;
        let inside = pool
            .rewards
            .rate_inside(order_key.start_time, order_key.end_time, now)
            .for_side(order_key.is_token1);
        let proceeds = uncollected_proceeds(order.sale_rate, inside, order.reward_rate_snapshot)?;

        order.amount_sold = accrued_amount_sold(&order, &order_key, now);
        order.last_update_time = now;
        order.reward_rate_snapshot = inside;
        self.orders.insert(order_key, order);

        if !proceeds.is_zero() {
            let buy_token = order_key.buy_token();
            ledger.debit(self.address, buy_token, proceeds);
            ledger.credit(order_key.owner, buy_token, proceeds);
        }

        Ok(proceeds)
    }

    /// Runs virtual order execution through `now`, then reports the order's
    /// current standing.
    pub fn get_current_order_status<A: AmmCore, L: SettlementLedger>(
        &mut self,
        order_key: &OrderKey,
        core: &mut A,
        ledger: &mut L,
        now: u64,
    ) -> Result<OrderStatus, TwammError<A::Error>> {
        self.execute_virtual_orders(order_key.pool, core, ledger, now)?;
        self.status_of(order_key, now)
    }

    /// A point-in-time view of an order. Accurate when virtual orders have
    /// been executed through `now`.
    pub fn order_status(
        &self,
        order_key: &OrderKey,
        now: u64,
    ) -> Result<OrderStatus, TwammError> {
        self.status_of(order_key, now)
    }

    fn status_of<E>(&self, order_key: &OrderKey, now: u64) -> Result<OrderStatus, TwammError<E>> {
        let pool = self
            .pools
            .get(&order_key.pool)
            .ok_or(TwammError::PoolNotInitialized)?;
        let order = self.orders.get(order_key).copied().unwrap_or_default();

        let inside = pool
            .rewards
            .rate_inside(order_key.start_time, order_key.end_time, now)
            .for_side(order_key.is_token1);
        let purchased_amount =
            uncollected_proceeds(order.sale_rate, inside, order.reward_rate_snapshot)?;

        let remaining_sell_amount = if now >= order_key.end_time {
            0
        } else {
            let remaining = (order_key.end_time - max(order_key.start_time, now)) as u32;
            amount_from_sale_rate(order.sale_rate, remaining, true)
        };

        Ok(OrderStatus {
            sale_rate: order.sale_rate,
            amount_sold: accrued_amount_sold(&order, order_key, now),
            remaining_sell_amount,
            purchased_amount,
        })
    }
}

fn validate_order_window<E>(key: &OrderKey, now: u64) -> Result<(), TwammError<E>> {
    if key.start_time >= key.end_time {
        return Err(TwammError::InvalidTimestamps);
    }
    if key.end_time <= now {
        return Err(TwammError::OrderAlreadyEnded);
    }
    if key.end_time - now > u32::MAX.into() {
        return Err(TwammError::InvalidTimestamps);
    }
    let start_distance = if key.start_time > now {
        key.start_time - now
    } else {
        now - key.start_time
    };
    if start_distance > u32::MAX.into() {
        return Err(TwammError::InvalidTimestamps);
    }
    Ok(())
}

fn to_swap_amount<E>(amount: u128) -> Result<i128, TwammError<E>> {
    amount.to_i128().ok_or(TwammError::SaleAmountOverflow)
}

fn settled_amounts<E>(
    delta: crate::amm::SwapDelta,
    offered: u128,
) -> Result<(u128, u128), TwammError<E>> {
    let consumed = delta
        .consumed_amount
        .to_u128()
        .ok_or(TwammError::InvalidSwapDelta)?;
    let calculated = delta
        .calculated_amount
        .to_u128()
        .ok_or(TwammError::InvalidSwapDelta)?;
    if consumed > offered {
        return Err(TwammError::InvalidSwapDelta);
    }
    Ok((consumed, calculated))
}

fn uncollected_proceeds<E>(
    sale_rate: u128,
    inside: U256,
    snapshot: U256,
) -> Result<u128, TwammError<E>> {
    // counters are monotone, so the snapshot never exceeds the inside value
    let delta = inside - snapshot;
    let amount = muldiv(U256::from(sale_rate), delta, X128, false)
        .map_err(|_| TwammError::SaleAmountOverflow)?;
    u128::try_from(amount).map_err(|_| TwammError::SaleAmountOverflow)
}

fn accrued_amount_sold(order: &OrderState, key: &OrderKey, now: u64) -> u128 {
    let from = max(order.last_update_time, key.start_time);
    let until = min(now, key.end_time);
    if until <= from || order.sale_rate.is_zero() {
        return order.amount_sold;
    }
    // end_time - last_update_time was checked against u32::MAX when the rate
    // last changed, so the accrual span always fits
    let elapsed = u32::try_from(until - from).expect("accrual span fits in u32");
    order.amount_sold + amount_from_sale_rate(order.sale_rate, elapsed, false)
}
