//! Throughput readings consumed by the controllers.
//!
//! The sliding-window engine that actually computes these numbers lives
//! outside this crate; controllers only see the [`StatisticsSource`] contract.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-resource pass-rate readings.
///
/// Both readings are non-negative and may lag by up to one window interval.
pub trait StatisticsSource: Send + Sync + fmt::Debug {
    /// Pass QPS of the current window.
    fn pass_qps(&self) -> f64;

    /// Pass QPS of the previous, completed window.
    fn previous_pass_qps(&self) -> f64;
}

/// Shared handle to a statistics node in the invocation tree.
pub type NodeRef = Arc<dyn StatisticsSource>;

/// Settable readings, for hosts that measure throughput elsewhere.
///
/// Values are stored as `f64` bit patterns so updates stay lock-free.
#[derive(Default)]
pub struct ManualStatistics {
    pass: AtomicU64,
    previous_pass: AtomicU64,
}

impl ManualStatistics {
    pub fn new(pass_qps: f64, previous_pass_qps: f64) -> Self {
        let stats = Self::default();
        stats.set_pass_qps(pass_qps);
        stats.set_previous_pass_qps(previous_pass_qps);
        stats
    }

    /// Negative or NaN readings are stored as zero.
    pub fn set_pass_qps(&self, qps: f64) {
        self.pass.store(sanitize(qps).to_bits(), Ordering::Release);
    }

    pub fn set_previous_pass_qps(&self, qps: f64) {
        self.previous_pass.store(sanitize(qps).to_bits(), Ordering::Release);
    }
}

fn sanitize(qps: f64) -> f64 {
    if qps.is_nan() || qps < 0.0 {
        0.0
    } else {
        qps
    }
}

impl StatisticsSource for ManualStatistics {
    fn pass_qps(&self) -> f64 {
        f64::from_bits(self.pass.load(Ordering::Acquire))
    }

    fn previous_pass_qps(&self) -> f64 {
        f64::from_bits(self.previous_pass.load(Ordering::Acquire))
    }
}

impl fmt::Debug for ManualStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualStatistics")
            .field("pass_qps", &self.pass_qps())
            .field("previous_pass_qps", &self.previous_pass_qps())
            .finish()
    }
}
