//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGTERM and SIGINT (Ctrl-C elsewhere)
//! - Expose them as a stream of [`Termination`] events
//!
//! Once registered, tokio keeps the handlers installed for the life of the
//! process, so signals that arrive after the first are delivered to the
//! stream (or dropped) instead of killing the process.

use std::fmt;
use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

/// Which termination request was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Interrupt => f.write_str("SIGINT"),
            Termination::Terminate => f.write_str("SIGTERM"),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to install {signal} handler: {source}")]
pub struct SignalError {
    signal: &'static str,
    #[source]
    source: std::io::Error,
}

/// Source of termination requests.
pub trait TerminationSignals: Send + 'static {
    /// Wait for the next termination request. `None` means the source is
    /// exhausted and will never deliver another one.
    ///
    /// Must be cancel safe.
    fn recv(&mut self) -> impl Future<Output = Option<Termination>> + Send;
}

/// Process signals delivered through tokio.
#[derive(Debug)]
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl OsSignals {
    /// Register the handlers. Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn install() -> Result<Self, SignalError> {
        use tokio::signal::unix::{signal, SignalKind};

        let interrupt = signal(SignalKind::interrupt()).map_err(|source| SignalError {
            signal: "SIGINT",
            source,
        })?;
        let terminate = signal(SignalKind::terminate()).map_err(|source| SignalError {
            signal: "SIGTERM",
            source,
        })?;
        Ok(Self {
            interrupt,
            terminate,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self, SignalError> {
        Ok(Self {})
    }
}

impl TerminationSignals for OsSignals {
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<Termination> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| Termination::Interrupt),
            received = self.terminate.recv() => received.map(|()| Termination::Terminate),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<Termination> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| Termination::Interrupt)
    }
}

/// In-process signal source, for embedding and tests.
impl TerminationSignals for mpsc::UnboundedReceiver<Termination> {
    async fn recv(&mut self) -> Option<Termination> {
        mpsc::UnboundedReceiver::recv(self).await
    }
}

impl TerminationSignals for mpsc::Receiver<Termination> {
    async fn recv(&mut self) -> Option<Termination> {
        mpsc::Receiver::recv(self).await
    }
}
