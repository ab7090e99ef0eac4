//! Validated construction of shaping controllers.
//!
//! With the `serde` feature enabled a [`ShapingConfig`] deserializes from a
//! document tagged by `behavior`:
//!
//! ```json
//! { "behavior": "warm_up", "count": 20.0, "warm_up_period_sec": 10 }
//! ```

use crate::error::ShapingError;
use crate::shaping::{
    RateLimiterController, ThresholdController, TrafficShapingController, WarmUpController,
    DEFAULT_COLD_FACTOR,
};
use std::sync::Arc;

/// Shaping behaviors and their classic numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ControlBehavior {
    Default,
    WarmUp,
    RateLimiter,
}

impl ControlBehavior {
    pub fn code(self) -> i32 {
        match self {
            ControlBehavior::Default => 0,
            ControlBehavior::WarmUp => 1,
            ControlBehavior::RateLimiter => 2,
        }
    }
}

impl TryFrom<i32> for ControlBehavior {
    type Error = ShapingError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ControlBehavior::Default),
            1 => Ok(ControlBehavior::WarmUp),
            2 => Ok(ControlBehavior::RateLimiter),
            other => Err(ShapingError::UnknownBehavior(other)),
        }
    }
}

fn default_cold_factor() -> i32 {
    DEFAULT_COLD_FACTOR
}

/// Parameters for one controller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "behavior", rename_all = "snake_case"))]
pub enum ShapingConfig {
    /// Direct comparison against `count`.
    #[cfg_attr(feature = "serde", serde(rename = "default"))]
    Threshold { count: f64 },
    /// Cold-start ramp to `count` over `warm_up_period_sec`.
    WarmUp {
        count: f64,
        warm_up_period_sec: i32,
        #[cfg_attr(feature = "serde", serde(default = "default_cold_factor"))]
        cold_factor: i32,
    },
    /// Pacing at `count` per second with a bounded queueing wait.
    RateLimiter { count: f64, max_queueing_time_ms: u32 },
}

impl ShapingConfig {
    /// Warm-up parameters with the default cold factor.
    pub fn warm_up(count: f64, warm_up_period_sec: i32) -> Self {
        ShapingConfig::WarmUp { count, warm_up_period_sec, cold_factor: default_cold_factor() }
    }

    pub fn behavior(&self) -> ControlBehavior {
        match self {
            ShapingConfig::Threshold { .. } => ControlBehavior::Default,
            ShapingConfig::WarmUp { .. } => ControlBehavior::WarmUp,
            ShapingConfig::RateLimiter { .. } => ControlBehavior::RateLimiter,
        }
    }

    /// Check the parameters without building a controller.
    pub fn validate(&self) -> Result<(), ShapingError> {
        match self {
            ShapingConfig::WarmUp { cold_factor, .. } if *cold_factor <= 1 => {
                Err(ShapingError::InvalidColdFactor { provided: *cold_factor })
            }
            _ => Ok(()),
        }
    }

    /// Build the configured controller using the wall clock and tokio sleeper.
    pub fn build(&self) -> Result<Arc<dyn TrafficShapingController>, ShapingError> {
        self.validate()?;
        let controller: Arc<dyn TrafficShapingController> = match *self {
            ShapingConfig::Threshold { count } => Arc::new(ThresholdController::new(count)),
            ShapingConfig::WarmUp { count, warm_up_period_sec, cold_factor } => {
                Arc::new(WarmUpController::new(count, warm_up_period_sec, cold_factor)?)
            }
            ShapingConfig::RateLimiter { count, max_queueing_time_ms } => {
                Arc::new(RateLimiterController::new(max_queueing_time_ms, count))
            }
        };
        tracing::debug!(behavior = ?self.behavior(), "Built traffic shaping controller");
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ManualStatistics;

    #[test]
    fn behavior_codes_round_trip() {
        for behavior in [ControlBehavior::Default, ControlBehavior::WarmUp, ControlBehavior::RateLimiter] {
            assert_eq!(ControlBehavior::try_from(behavior.code()), Ok(behavior));
        }
        assert_eq!(ControlBehavior::try_from(7), Err(ShapingError::UnknownBehavior(7)));
    }

    #[test]
    fn warm_up_shortcut_uses_default_cold_factor() {
        assert_eq!(
            ShapingConfig::warm_up(20.0, 10),
            ShapingConfig::WarmUp { count: 20.0, warm_up_period_sec: 10, cold_factor: 3 }
        );
    }

    #[test]
    fn invalid_cold_factor_fails_validation_and_build() {
        let cfg = ShapingConfig::WarmUp { count: 20.0, warm_up_period_sec: 10, cold_factor: 1 };
        assert_eq!(cfg.validate(), Err(ShapingError::InvalidColdFactor { provided: 1 }));
        assert!(cfg.build().is_err());
    }

    #[tokio::test]
    async fn builds_each_behavior() {
        let stats = ManualStatistics::new(0.0, 0.0);
        let configs = [
            ShapingConfig::Threshold { count: 5.0 },
            ShapingConfig::warm_up(20.0, 10),
            ShapingConfig::RateLimiter { count: 10.0, max_queueing_time_ms: 500 },
        ];
        for cfg in configs {
            let controller = cfg.build().expect("valid config");
            assert!(controller.can_pass(&stats, 1, false).await, "{cfg:?} should admit");
        }
    }
}
