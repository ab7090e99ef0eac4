//! Warm-up (cold start) controller.
//!
//! The bucket fill level is a proxy for how idle the resource has recently been.
//! Above `warning_token` the resource is "cold" and the permitted rate is
//! interpolated linearly from `count / cold_factor` up to `count` as the bucket
//! drains back to `warning_token`. Below it the resource is warm and the full
//! `count` applies.
//!
//! With `count = 20`, a 10 second warm-up and the default cold factor of 3, the
//! bucket holds up to 200 tokens, the warning line sits at 100 and a cold
//! resource starts at roughly 6.7 QPS.

use super::{next_up, TrafficShapingController};
use crate::clock::{Clock, SystemClock};
use crate::error::ShapingError;
use crate::stats::StatisticsSource;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Cold factor used when none is configured.
pub const DEFAULT_COLD_FACTOR: i32 = 3;

#[derive(Debug)]
pub struct WarmUpController {
    count: f64,
    cold_factor: i32,
    warning_token: i64,
    max_token: i64,
    slope: f64,
    stored_tokens: AtomicI64,
    last_filled_time: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl WarmUpController {
    /// Create a controller that ramps up to `count` QPS over `warm_up_period_sec`.
    ///
    /// Errors if `cold_factor <= 1`.
    ///
    /// # Examples
    /// ```
    /// use flowgate::WarmUpController;
    /// let controller = WarmUpController::new(20.0, 10, 3).unwrap();
    /// assert_eq!(controller.warning_token(), 100);
    /// assert_eq!(controller.max_token(), 200);
    /// ```
    pub fn new(count: f64, warm_up_period_sec: i32, cold_factor: i32) -> Result<Self, ShapingError> {
        if cold_factor <= 1 {
            return Err(ShapingError::InvalidColdFactor { provided: cold_factor });
        }

        let period = f64::from(warm_up_period_sec);
        let warning_token = (period * count) as i64 / i64::from(cold_factor - 1);
        let max_token = warning_token + (2.0 * period * count / (1.0 + f64::from(cold_factor))) as i64;
        let slope = (f64::from(cold_factor) - 1.0) / count / (max_token - warning_token) as f64;

        Ok(Self {
            count,
            cold_factor,
            warning_token,
            max_token,
            slope,
            stored_tokens: AtomicI64::new(0),
            last_filled_time: AtomicI64::new(0),
            clock: Arc::new(SystemClock),
        })
    }

    /// Same as [`new`](Self::new) with [`DEFAULT_COLD_FACTOR`].
    pub fn with_default_cold_factor(count: f64, warm_up_period_sec: i32) -> Result<Self, ShapingError> {
        Self::new(count, warm_up_period_sec, DEFAULT_COLD_FACTOR)
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn cold_factor(&self) -> i32 {
        self.cold_factor
    }

    /// Token level at and above which the resource counts as cold.
    pub fn warning_token(&self) -> i64 {
        self.warning_token
    }

    /// Bucket capacity.
    pub fn max_token(&self) -> i64 {
        self.max_token
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// Current bucket fill level.
    pub fn stored_tokens(&self) -> i64 {
        self.stored_tokens.load(Ordering::Acquire)
    }

    /// Whole-second timestamp (ms) of the last successful refill, 0 if never refilled.
    pub fn last_filled_time(&self) -> i64 {
        self.last_filled_time.load(Ordering::Acquire)
    }

    /// Instantaneous QPS permitted at the given bucket level.
    ///
    /// Equals `count` in the warm region and decreases as the level rises above
    /// `warning_token`.
    pub fn permitted_qps(&self, tokens: i64) -> f64 {
        if tokens < self.warning_token {
            return self.count;
        }
        let above = tokens - self.warning_token;
        let interval = if above == 0 { 0.0 } else { above as f64 * self.slope };
        next_up(1.0 / (interval + 1.0 / self.count))
    }

    /// Refill the bucket at most once per whole second.
    ///
    /// Losing the compare-and-swap to a concurrent caller skips the refill for
    /// this call; every caller attempts it, so the bucket still converges.
    fn sync_token(&self, previous_pass_qps: i64) {
        let now = i64::try_from(self.clock.now_millis()).unwrap_or(i64::MAX);
        let now_second = now - now % 1000;
        if now_second <= self.last_filled_time.load(Ordering::Acquire) {
            return;
        }

        let old_value = self.stored_tokens.load(Ordering::Acquire);
        let new_value = self.cool_down_tokens(old_value, now_second, previous_pass_qps);

        if self
            .stored_tokens
            .compare_exchange(old_value, new_value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Tokens already spent by the previous window's traffic.
            let _ = self.stored_tokens.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(previous_pass_qps).max(0))
            });
            self.last_filled_time.store(now_second, Ordering::Release);
        }
    }

    fn cool_down_tokens(&self, old_value: i64, now_second: i64, previous_pass_qps: i64) -> i64 {
        let refill = |old: i64| {
            let elapsed = now_second.saturating_sub(self.last_filled_time.load(Ordering::Acquire));
            (old as f64 + elapsed as f64 * self.count / 1000.0) as i64
        };

        // Grow while warm, or while cold and the previous window under-used capacity.
        let idle = previous_pass_qps < (self.count as i64) / i64::from(self.cold_factor);
        let new_value = if old_value < self.warning_token || (old_value > self.warning_token && idle) {
            refill(old_value)
        } else {
            old_value
        };

        new_value.min(self.max_token)
    }
}

#[async_trait]
impl TrafficShapingController for WarmUpController {
    async fn can_pass(
        &self,
        stats: &dyn StatisticsSource,
        acquire_count: u32,
        _prioritized: bool,
    ) -> bool {
        let pass_qps = stats.pass_qps() as i64;
        let previous_qps = stats.previous_pass_qps() as i64;
        self.sync_token(previous_qps);

        let rest = self.stored_tokens.load(Ordering::Acquire);
        let demand = (pass_qps + i64::from(acquire_count)) as f64;
        let passed = if rest >= self.warning_token {
            demand <= self.permitted_qps(rest)
        } else {
            demand <= self.count
        };

        if !passed {
            tracing::debug!(
                pass_qps,
                acquire_count,
                stored_tokens = rest,
                warning_token = self.warning_token,
                "Warm-up controller: blocked"
            );
        }
        passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::stats::ManualStatistics;

    fn controller_at(clock: &ManualClock) -> WarmUpController {
        WarmUpController::new(20.0, 10, 3).expect("valid warm-up").with_clock(clock.clone())
    }

    #[test]
    fn derives_thresholds_from_parameters() {
        let controller = WarmUpController::new(20.0, 10, 3).unwrap();
        assert_eq!(controller.warning_token(), 100);
        assert_eq!(controller.max_token(), 200);
        assert_eq!(controller.slope(), 0.001);
    }

    #[test]
    fn rejects_cold_factor_of_one_or_less() {
        for bad in [1, 0, -3] {
            let err = WarmUpController::new(20.0, 10, bad).expect_err("invalid cold factor");
            assert_eq!(err, ShapingError::InvalidColdFactor { provided: bad });
        }
    }

    #[test]
    fn default_cold_factor_is_three() {
        let controller = WarmUpController::with_default_cold_factor(20.0, 10).unwrap();
        assert_eq!(controller.cold_factor(), 3);
    }

    #[test]
    fn permitted_qps_meets_count_at_warning_line() {
        let controller = WarmUpController::new(20.0, 10, 3).unwrap();
        let at_warning = controller.permitted_qps(100);
        assert!(at_warning > 20.0);
        assert!(at_warning - 20.0 < 1e-9);
        // Fully cold: 1 / (100 * 0.001 + 0.05) = 6.67
        let cold = controller.permitted_qps(200);
        assert!((cold - 20.0 / 3.0).abs() < 1e-9);
        assert_eq!(controller.permitted_qps(50), 20.0);
    }

    #[test]
    fn permitted_qps_is_non_increasing_above_warning() {
        let controller = WarmUpController::new(20.0, 10, 3).unwrap();
        let mut previous = f64::INFINITY;
        for tokens in controller.warning_token()..=controller.max_token() {
            let qps = controller.permitted_qps(tokens);
            assert!(qps <= previous, "qps rose at {tokens} tokens");
            previous = qps;
        }
    }

    #[tokio::test]
    async fn first_call_fills_bucket_to_capacity() {
        let clock = ManualClock::new(1_000_000);
        let controller = controller_at(&clock);
        let stats = ManualStatistics::new(0.0, 0.0);

        assert!(controller.can_pass(&stats, 1, false).await);
        assert_eq!(controller.stored_tokens(), 200);
        assert_eq!(controller.last_filled_time(), 1_000_000);
    }

    #[tokio::test]
    async fn cold_resource_caps_rate_below_count() {
        let clock = ManualClock::new(1_000_000);
        let controller = controller_at(&clock);

        // Cold start permits about 6.67 QPS.
        let busy = ManualStatistics::new(6.0, 0.0);
        assert!(!controller.can_pass(&busy, 1, false).await);
        let light = ManualStatistics::new(5.0, 0.0);
        assert!(controller.can_pass(&light, 1, false).await);
    }

    #[tokio::test]
    async fn refill_happens_once_per_second() {
        let clock = ManualClock::new(1_000_000);
        let controller = controller_at(&clock);
        let stats = ManualStatistics::new(0.0, 0.0);
        controller.can_pass(&stats, 1, false).await;

        // Same second: the subtraction of previous traffic must not repeat.
        stats.set_previous_pass_qps(30.0);
        clock.advance(999);
        controller.can_pass(&stats, 1, false).await;
        assert_eq!(controller.stored_tokens(), 200);

        clock.advance(1);
        controller.can_pass(&stats, 1, false).await;
        assert_eq!(controller.stored_tokens(), 170);
        assert_eq!(controller.last_filled_time(), 1_001_000);
    }

    #[tokio::test]
    async fn sustained_traffic_drains_bucket_to_warm_region() {
        let clock = ManualClock::new(1_000_000);
        let controller = controller_at(&clock);
        let stats = ManualStatistics::new(0.0, 0.0);
        controller.can_pass(&stats, 1, false).await;

        stats.set_previous_pass_qps(20.0);
        for _ in 0..10 {
            clock.advance(1_000);
            controller.can_pass(&stats, 1, false).await;
        }

        // Busy at or above the warning line stops refills, so traffic drains it.
        assert!(controller.stored_tokens() < controller.warning_token());
        stats.set_pass_qps(19.0);
        assert!(controller.can_pass(&stats, 1, false).await);
        stats.set_pass_qps(20.0);
        assert!(!controller.can_pass(&stats, 1, false).await);
    }

    #[tokio::test]
    async fn subtraction_clamps_at_zero() {
        let clock = ManualClock::new(1_000_000);
        let controller = controller_at(&clock);
        let stats = ManualStatistics::new(0.0, 500.0);

        controller.can_pass(&stats, 1, false).await;

        assert_eq!(controller.stored_tokens(), 0);
    }

    #[tokio::test]
    async fn prioritized_flag_does_not_change_decision() {
        let clock = ManualClock::new(1_000_000);
        let controller = controller_at(&clock);
        let stats = ManualStatistics::new(6.0, 0.0);

        assert_eq!(
            controller.can_pass(&stats, 1, true).await,
            controller.can_pass(&stats, 1, false).await
        );
    }
}
