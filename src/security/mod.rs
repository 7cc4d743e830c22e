//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (shared token bucket)
//!     → Pass to the next stage, or answer 429
//! ```
//!
//! # Design Decisions
//! - Fail closed: a rejected request never reaches inner stages
//! - Rejection is an expected outcome, not an error

pub mod rate_limit;

pub use rate_limit::{rate_limiter, RateLimiter};
