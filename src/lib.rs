//! Graceful HTTP serving toolkit.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::Listener ──▶ http::ServerHandle ──▶ Handler
//!                      (conn limit)      (hyper HTTP/1.1)       (composed stages)
//!                                              ▲
//!                                              │ shutdown(deadline)
//!                                              │
//!     SIGINT / SIGTERM ──▶ lifecycle::ShutdownCoordinator ──▶ CompletionSignal
//! ```
//!
//! - `http::middleware` composes request stages around a terminal handler
//! - `security::rate_limit` is a token bucket stage answering 429
//! - `lifecycle` turns the first termination signal into one bounded drain
//! - `config` and `observability` carry the TOML file, logging and metrics

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::ServerConfig;
pub use http::{compose, Handler, MiddlewareChain, ServerHandle, Stage};
pub use lifecycle::{start_graceful_shutdown, CompletionSignal, GracefulServer, ShutdownLogger};
pub use security::{rate_limiter, RateLimiter};
