//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (hyper HTTP/1.1, drain on shutdown)
//!     → middleware/ (composed stages, outermost first)
//!     → terminal handler
//!     → response.rs (status, size and attached error for the stages)
//!     → Send to client
//! ```

pub mod middleware;
pub mod response;
pub mod server;

pub use middleware::{compose, Handler, MiddlewareChain, Stage};
pub use response::{ResponseError, ResponseErrorExt, ResponseInfo};
pub use server::{ServerError, ServerHandle, ServerState};
