//! Direct threshold comparison.

use super::TrafficShapingController;
use crate::stats::StatisticsSource;
use async_trait::async_trait;

/// Admits while `pass_qps + acquire_count` stays within `count`.
#[derive(Debug, Clone)]
pub struct ThresholdController {
    count: f64,
}

impl ThresholdController {
    pub fn new(count: f64) -> Self {
        Self { count }
    }

    pub fn count(&self) -> f64 {
        self.count
    }
}

#[async_trait]
impl TrafficShapingController for ThresholdController {
    async fn can_pass(
        &self,
        stats: &dyn StatisticsSource,
        acquire_count: u32,
        _prioritized: bool,
    ) -> bool {
        let current = stats.pass_qps();
        let passed = current + f64::from(acquire_count) <= self.count;
        if !passed {
            tracing::debug!(pass_qps = current, acquire_count, count = self.count, "Threshold controller: blocked");
        }
        passed
    }
}
