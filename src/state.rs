use alloc::collections::BTreeMap;
use ruint::aliases::U256;

use crate::math::sale_rate::{constrain_rate_delta, SaleRateError};
use crate::reward::{RewardRates, RewardTracker};
use crate::time_bitmap::TimeBitmap;

/// Aggregate virtual order state of a pool. Sale rates are 80.32 fixed
/// point tokens per second, summed over all orders active at
/// `last_execution_time`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolState {
    pub last_execution_time: u64,
    pub token0_sale_rate: u128,
    pub token1_sale_rate: u128,
}

impl PoolState {
    pub fn sale_rate_for_side(&self, is_token1: bool) -> u128 {
        if is_token1 {
            self.token1_sale_rate
        } else {
            self.token0_sale_rate
        }
    }
}

/// Bookkeeping for a scheduled boundary timestamp: how many live orders
/// reference it and the net sale rate change to apply when the execution
/// loop crosses it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeInfo {
    pub num_orders: u32,
    pub sale_rate_delta0: i128,
    pub sale_rate_delta1: i128,
}

/// Per-order accounting. `reward_rate_snapshot` is the reward counter value
/// already accounted for, re-encoded on every rate change so uncollected
/// proceeds survive updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderState {
    pub sale_rate: u128,
    pub last_update_time: u64,
    pub amount_sold: u128,
    pub reward_rate_snapshot: U256,
}

/// The full virtual order book of one pool: aggregate rates, scheduled
/// boundaries, the boundary bitmap, and the reward counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolTwamm {
    pub(crate) state: PoolState,
    pub(crate) time_infos: BTreeMap<u64, TimeInfo>,
    pub(crate) bitmap: TimeBitmap,
    pub(crate) rewards: RewardTracker,
}

impl PoolTwamm {
    pub fn new(now: u64) -> Self {
        PoolTwamm {
            state: PoolState {
                last_execution_time: now,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn time_info(&self, time: u64) -> Option<&TimeInfo> {
        self.time_infos.get(&time)
    }

    pub fn reward_rates(&self) -> RewardRates {
        self.rewards.current()
    }

    /// The earliest scheduled boundary in `(after, until]`, if any.
    pub fn next_boundary(&self, after: u64, until: u64) -> Option<u64> {
        self.bitmap.next_scheduled(after, until)
    }

    /// Applies an order's contribution change at a boundary: `rate_delta`
    /// is added to the side's scheduled sale rate change and
    /// `order_count_change` to the boundary's order refcount. Schedules the
    /// boundary when the refcount leaves zero, taking a preemptive reward
    /// snapshot, and unschedules it when the refcount returns to zero.
    pub fn adjust_boundary(
        &mut self,
        time: u64,
        is_token1: bool,
        rate_delta: i128,
        order_count_change: i32,
    ) -> Result<(), SaleRateError> {
        let mut info = self.time_infos.get(&time).copied().unwrap_or_default();
        let was_scheduled = info.num_orders != 0;

        let delta = if is_token1 {
            &mut info.sale_rate_delta1
        } else {
            &mut info.sale_rate_delta0
        };
        *delta = constrain_rate_delta(*delta, rate_delta)?;

        // refcounts move by one exactly on an order's zero to non-zero rate
        // transitions, so the count never drops below zero
        info.num_orders = info
            .num_orders
            .checked_add_signed(order_count_change)
            .expect("boundary order count stays non-negative");
        let now_scheduled = info.num_orders != 0;

        if now_scheduled {
            self.time_infos.insert(time, info);
        } else {
            self.time_infos.remove(&time);
        }

        if was_scheduled != now_scheduled {
            if now_scheduled {
                self.rewards.snapshot_before(time);
            }
            self.bitmap.flip(time);
        }

        Ok(())
    }
}
