#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # flowgate
//!
//! Admission control for a protected resource, plus tracking of the nested
//! invocations that were admitted.
//!
//! ## Features
//!
//! - **Warm-up shaping**: token-bucket ramp from a reduced cold rate to the target rate
//! - **Pacing**: fixed-interval admission with a bounded virtual queue
//! - **Threshold**: direct comparison against the target rate
//! - **Invocation contexts** with a strict LIFO entry stack, termination handlers
//!   and forced unwinding of out-of-order exits
//! - **Lock-free controllers** using atomics only
//! - **Tower middleware** gating any service on a controller
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgate::{ManualStatistics, ShapingConfig, TrafficShapingController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let controller = ShapingConfig::warm_up(20.0, 10).build().unwrap();
//!     let stats = ManualStatistics::new(0.0, 0.0);
//!
//!     if controller.can_pass(&stats, 1, false).await {
//!         // Serve the request.
//!     }
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod context_util;
pub mod entry;
pub mod error;
pub mod middleware;
pub mod prelude;
pub mod shaping;
pub mod sleeper;
pub mod stats;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ControlBehavior, ShapingConfig};
pub use context::{ContextKind, InvocationContext, DEFAULT_CONTEXT_NAME, NULL_CONTEXT_NAME};
pub use entry::{
    ChainRef, Entry, EntryId, EntryType, ExitOutcome, ProcessorChain, ResourceWrapper,
    TerminationHandler,
};
pub use error::{ContextError, EntryError, GateError, HandlerError, ShapingError};
pub use middleware::{ShapingLayer, ShapingService};
pub use shaping::{
    RateLimiterController, ThresholdController, TrafficShapingController, WarmUpController,
    DEFAULT_COLD_FACTOR,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stats::{ManualStatistics, NodeRef, StatisticsSource};
