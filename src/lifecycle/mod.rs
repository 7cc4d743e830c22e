//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Termination event
//!
//! Shutdown (shutdown.rs):
//!     First termination event → Stop accepting → Drain until deadline
//!         → Close the rest → Fire completion signal
//! ```
//!
//! # Design Decisions
//! - Shutdown runs at most once per coordinator; later signals are absorbed
//! - Shutdown has a deadline: connections still open past it are closed
//! - Completion fires whether or not the drain finished in time

pub mod shutdown;
pub mod signals;

pub use shutdown::{
    start_graceful_shutdown, CompletionSignal, GracefulServer, ShutdownCoordinator,
    ShutdownLogger, TracingLogger,
};
pub use signals::{OsSignals, SignalError, Termination, TerminationSignals};
