//! Request pipeline stages.
//!
//! # Data Flow
//! ```text
//! Incoming request (outermost stage first):
//!     → metrics.rs (in-flight gauge, latency, size)
//!     → access_log.rs (one event per request)
//!     → recovery.rs (panic isolation)
//!     → security::rate_limit (token bucket, may answer 429)
//!     → terminal handler
//! ```
//!
//! The order above is what the binary registers; `chain.rs` defines how any
//! order composes.

pub mod access_log;
pub mod chain;
pub mod metrics;
pub mod recovery;

pub use access_log::access_log;
pub use chain::{compose, Handler, MiddlewareChain, Stage};
pub use metrics::track_metrics;
pub use recovery::recover_panics;
