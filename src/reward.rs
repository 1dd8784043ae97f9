use alloc::collections::BTreeMap;
use derive_more::{Add, AddAssign, Sub, SubAssign};
use ruint::aliases::U256;

/// Cumulative proceeds per unit of sale rate, X128 fixed point, one counter
/// per selling side. `selling_token0` is denominated in token1 (token0
/// sellers purchase token1) and vice versa. Monotonically non-decreasing.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Add, AddAssign, Sub, SubAssign,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RewardRates {
    pub selling_token0: U256,
    pub selling_token1: U256,
}

impl RewardRates {
    pub fn for_side(&self, is_token1: bool) -> U256 {
        if is_token1 {
            self.selling_token1
        } else {
            self.selling_token0
        }
    }
}

/// Tracks the running reward rate counters for a pool along with the
/// `before` snapshots taken at scheduled boundary timestamps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RewardTracker {
    current: RewardRates,
    before: BTreeMap<u64, RewardRates>,
}

impl RewardTracker {
    pub fn current(&self) -> RewardRates {
        self.current
    }

    /// Credits `received` tokens to the orders selling the opposite token,
    /// pro rata over that side's aggregate sale rate.
    pub fn accrue(&mut self, selling_token1: bool, received: u128, sale_rate: u128) {
        if sale_rate == 0 || received == 0 {
            return;
        }
        let delta = (U256::from(received) << 128) / U256::from(sale_rate);
        if selling_token1 {
            self.current.selling_token1 += delta;
        } else {
            self.current.selling_token0 += delta;
        }
    }

    /// Records the current counters as the rate observed before `time`.
    /// Written preemptively when a boundary is first scheduled and
    /// authoritatively when the execution loop crosses it.
    pub fn snapshot_before(&mut self, time: u64) {
        self.before.insert(time, self.current);
    }

    /// The counters as of just before `time`. Timestamps that were never
    /// scheduled read as zero; order snapshots keep differences against
    /// these values consistent.
    pub fn before(&self, time: u64) -> RewardRates {
        self.before.get(&time).copied().unwrap_or_default()
    }

    /// Reward accrued to orders active over `[start, end)` as of `now`.
    /// Callers must have executed virtual orders through `now` so the
    /// current counters and the `end` snapshot are authoritative.
    pub fn rate_inside(&self, start: u64, end: u64, now: u64) -> RewardRates {
        if now <= start {
            RewardRates::default()
        } else if now < end {
            self.current - self.before(start)
        } else {
            self.before(end) - self.before(start)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accrue_is_exact_for_whole_rates() {
        let mut tracker = RewardTracker::default();
        tracker.accrue(false, 100, 1 << 32);
        // 100 << 128 / 2**32 == 100 << 96
        assert_eq!(
            tracker.current().selling_token0,
            U256::from(100) << 96
        );
        assert_eq!(tracker.current().selling_token1, U256::ZERO);
    }

    #[test]
    fn accrue_truncates() {
        let mut tracker = RewardTracker::default();
        tracker.accrue(true, 1, 3);
        assert_eq!(
            tracker.current().selling_token1,
            (U256::ONE << 128) / U256::from(3)
        );
    }

    #[test]
    fn accrue_with_zero_rate_is_a_no_op() {
        let mut tracker = RewardTracker::default();
        tracker.accrue(false, 100, 0);
        assert_eq!(tracker.current(), RewardRates::default());
    }

    #[test]
    fn counters_never_decrease() {
        let mut tracker = RewardTracker::default();
        let mut previous = tracker.current();
        for (received, rate) in [(100u128, 1u128 << 32), (1, 7), (1 << 100, 3 << 32)] {
            tracker.accrue(false, received, rate);
            tracker.accrue(true, received, rate);
            let current = tracker.current();
            assert!(current.selling_token0 >= previous.selling_token0);
            assert!(current.selling_token1 >= previous.selling_token1);
            previous = current;
        }
    }

    #[test]
    fn missing_snapshot_reads_as_zero() {
        let tracker = RewardTracker::default();
        assert_eq!(tracker.before(123), RewardRates::default());
    }

    mod rate_inside {
        use super::*;

        fn tracker_with_history() -> RewardTracker {
            let mut tracker = RewardTracker::default();
            // boundary at 100 scheduled before any rewards accrue
            tracker.snapshot_before(100);
            tracker.accrue(false, 1000, 1 << 32);
            tracker
        }

        #[test]
        fn zero_before_start() {
            let tracker = tracker_with_history();
            assert_eq!(
                tracker.rate_inside(100, 200, 50),
                RewardRates::default()
            );
            assert_eq!(
                tracker.rate_inside(100, 200, 100),
                RewardRates::default()
            );
        }

        #[test]
        fn current_minus_start_while_active() {
            let tracker = tracker_with_history();
            assert_eq!(
                tracker.rate_inside(100, 200, 150).selling_token0,
                U256::from(1000) << 96
            );
        }

        #[test]
        fn snapshot_difference_after_end() {
            let mut tracker = tracker_with_history();
            // crossing the end boundary records the authoritative snapshot
            tracker.snapshot_before(200);
            tracker.accrue(false, 500, 1 << 32);

            assert_eq!(
                tracker.rate_inside(100, 200, 250).selling_token0,
                U256::from(1000) << 96
            );
        }

        #[test]
        fn continuity_at_end_boundary() {
            let mut tracker = tracker_with_history();
            let just_before = tracker.rate_inside(100, 200, 199);
            tracker.snapshot_before(200);
            let at_end = tracker.rate_inside(100, 200, 200);
            assert_eq!(just_before, at_end);
        }

        #[test]
        fn unscheduled_start_uses_zero_baseline() {
            let mut tracker = RewardTracker::default();
            tracker.accrue(false, 100, 1 << 32);
            // start was never scheduled; the full counter is reported and
            // per order snapshots cancel the pre-start portion
            assert_eq!(
                tracker.rate_inside(50, 200, 60).selling_token0,
                U256::from(100) << 96
            );
        }
    }
}
