//! Convenient re-exports for common flowgate types.
pub use crate::{
    config::{ControlBehavior, ShapingConfig},
    context::InvocationContext,
    context_util,
    entry::{Entry, ProcessorChain, ResourceWrapper},
    error::{EntryError, GateError, ShapingError},
    middleware::ShapingLayer,
    shaping::{RateLimiterController, ThresholdController, TrafficShapingController, WarmUpController},
    stats::{ManualStatistics, StatisticsSource},
};
