//! Fixed-interval pacing controller.
//!
//! Successive grants are spaced at least `cost = acquire_count / rate` seconds
//! apart. A caller whose slot lies no more than `max_queueing_time` in the future
//! reserves it by advancing the pacing cursor and waits for it; there is no queue
//! structure beyond the cursor itself.

use super::TrafficShapingController;
use crate::clock::{Clock, SystemClock};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::stats::StatisticsSource;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cursor value before the first grant.
const NEVER: i64 = i64::MIN;

#[derive(Debug)]
pub struct RateLimiterController {
    max_queueing_time_ms: i64,
    rate: f64,
    latest_passed_time: AtomicI64,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

/// Logs a reservation whose wait was abandoned before completing.
///
/// The reserved slot is intentionally left on the cursor.
struct QueuedWait {
    cost_ms: i64,
    completed: bool,
}

impl Drop for QueuedWait {
    fn drop(&mut self) {
        if !self.completed {
            tracing::debug!(cost_ms = self.cost_ms, "Rate limiter: queued wait cancelled");
        }
    }
}

impl RateLimiterController {
    /// Create a pacing controller admitting `rate` units per second and queueing
    /// callers for at most `max_queueing_time_ms`.
    ///
    /// A non-positive `rate` rejects every non-empty request.
    pub fn new(max_queueing_time_ms: u32, rate: f64) -> Self {
        Self {
            max_queueing_time_ms: i64::from(max_queueing_time_ms),
            rate,
            latest_passed_time: AtomicI64::new(NEVER),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how queued callers wait.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn max_queueing_time(&self) -> Duration {
        Duration::from_millis(self.max_queueing_time_ms.unsigned_abs())
    }

    /// Timestamp (ms) of the most recent grant or reservation, `None` before the first.
    pub fn latest_passed_time(&self) -> Option<i64> {
        match self.latest_passed_time.load(Ordering::Acquire) {
            NEVER => None,
            t => Some(t),
        }
    }

    fn now(&self) -> i64 {
        i64::try_from(self.clock.now_millis()).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl TrafficShapingController for RateLimiterController {
    async fn can_pass(
        &self,
        _stats: &dyn StatisticsSource,
        acquire_count: u32,
        _prioritized: bool,
    ) -> bool {
        if acquire_count == 0 {
            return true;
        }
        // Otherwise the cost would be unbounded.
        if self.rate <= 0.0 || self.rate.is_nan() {
            return false;
        }

        let now = self.now();
        let cost = (f64::from(acquire_count) / self.rate * 1000.0).round() as i64;

        let latest = self.latest_passed_time.load(Ordering::Acquire);
        if latest == NEVER || cost.saturating_add(latest) <= now {
            // Contention may let a lower reading overwrite a higher one; tolerated.
            self.latest_passed_time.store(now, Ordering::Release);
            return true;
        }

        let wait = cost
            .saturating_add(self.latest_passed_time.load(Ordering::Acquire))
            .saturating_sub(self.now());
        if wait > self.max_queueing_time_ms {
            tracing::debug!(wait_ms = wait, max_ms = self.max_queueing_time_ms, "Rate limiter: blocked");
            return false;
        }

        let reserved = self.latest_passed_time.fetch_add(cost, Ordering::AcqRel) + cost;
        let wait = reserved.saturating_sub(self.now());
        if wait > self.max_queueing_time_ms {
            self.latest_passed_time.fetch_sub(cost, Ordering::AcqRel);
            tracing::debug!(wait_ms = wait, max_ms = self.max_queueing_time_ms, "Rate limiter: lost slot race");
            return false;
        }

        // A concurrent grant may already have moved past the reserved slot.
        if wait > 0 {
            let mut guard = QueuedWait { cost_ms: cost, completed: false };
            tracing::debug!(wait_ms = wait, "Rate limiter: queued");
            self.sleeper.sleep(Duration::from_millis(wait.unsigned_abs())).await;
            guard.completed = true;
        }
        true
    }
}
