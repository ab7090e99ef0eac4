//! Traffic shaping controllers.
//!
//! A controller decides, for one protected resource, whether `acquire_count`
//! units of demand may proceed right now:
//! - [`ThresholdController`]: direct comparison of current pass QPS with the limit.
//! - [`WarmUpController`]: token-bucket ramp from a reduced rate up to the limit
//!   after the resource has been idle.
//! - [`RateLimiterController`]: fixed-interval pacing that may queue a caller for a
//!   bounded time instead of rejecting it.
//!
//! Instances are shared by every caller of the resource. State changes use atomic
//! compare-and-swap and add/subtract only; no controller ever takes a lock.

use crate::stats::StatisticsSource;
use async_trait::async_trait;

pub mod rate_limiter;
pub mod threshold;
pub mod warm_up;

pub use rate_limiter::RateLimiterController;
pub use threshold::ThresholdController;
pub use warm_up::{WarmUpController, DEFAULT_COLD_FACTOR};

/// Admission decision capability shared by all shaping variants.
#[async_trait]
pub trait TrafficShapingController: Send + Sync + std::fmt::Debug {
    /// Decide whether `acquire_count` units may pass.
    ///
    /// `prioritized` is part of the contract for every variant; none of the
    /// variants in this crate change their decision on it.
    async fn can_pass(
        &self,
        stats: &dyn StatisticsSource,
        acquire_count: u32,
        prioritized: bool,
    ) -> bool;
}

/// Smallest `f64` strictly greater than `x`.
pub(crate) fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}
