//! HTTP server handle.
//!
//! # Responsibilities
//! - Run the HTTP/1.1 accept loop for a composed [`Handler`]
//! - Track every connection task so shutdown can drain or abort them
//! - Expose the lifecycle `Running → Draining → Closed` to callers
//!
//! # Design Decisions
//! - One tokio task per connection; requests on a connection run in order
//! - Draining asks hyper to close each connection after its current request
//! - At the deadline the remaining connection tasks are aborted, which closes
//!   their sockets

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tower::ServiceExt;

use crate::http::middleware::Handler;
use crate::lifecycle::GracefulServer;
use crate::net::{ConnectionTracker, Listener};

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting connections (or ready to).
    Running,
    /// No longer accepting; waiting for in-flight requests.
    Draining,
    /// Every connection is closed.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    state: ServerState,
    serving: bool,
    force_close: bool,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server closed")]
    Closed,

    #[error("server is already serving")]
    AlreadyServing,

    #[error("drain deadline exceeded with {remaining} connection(s) still open")]
    DeadlineExceeded { remaining: u64 },
}

/// Cloneable handle to one server. Serve with one clone, shut down with
/// another.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    lifecycle: watch::Sender<Lifecycle>,
    connections: ConnectionTracker,
}

impl ServerHandle {
    pub fn new() -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle {
            state: ServerState::Running,
            serving: false,
            force_close: false,
        });
        Self {
            inner: Arc::new(Inner {
                lifecycle,
                connections: ConnectionTracker::new(),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.borrow().state
    }

    /// Whether an accept loop is currently running.
    pub fn is_serving(&self) -> bool {
        self.inner.lifecycle.borrow().serving
    }

    pub fn active_connections(&self) -> u64 {
        self.inner.connections.active_count()
    }

    /// Accept connections on `listener` until shut down, then drain.
    ///
    /// Returns `Ok(())` once every connection is closed. Fails immediately
    /// if the server was already shut down or another loop is running.
    pub async fn serve(&self, listener: Listener, handler: Handler) -> Result<(), ServerError> {
        self.claim()?;
        let _closed_on_exit = CloseOnDrop(&self.inner.lifecycle);
        let mut lifecycle = self.inner.lifecycle.subscribe();

        tracing::info!(address = ?listener.local_addr().ok(), "HTTP server starting");

        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new());
        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    let guard = self.inner.connections.track();
                    let service = TowerToHyperService::new(
                        handler.clone().map_request(move |request: Request<Incoming>| {
                            with_peer(request, peer)
                        }),
                    );
                    let connection =
                        graceful.watch(http.serve_connection(TokioIo::new(stream), service));

                    connections.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = connection.await {
                            tracing::debug!(
                                connection_id = %guard.id(),
                                peer_addr = %peer,
                                error = %e,
                                "Connection error"
                            );
                        }
                        drop(guard);
                    });
                }
                _ = wait_until(&mut lifecycle, |l| l.state != ServerState::Running) => break,
                Some(joined) = connections.join_next() => log_join(joined),
            }
        }

        drop(listener);
        tracing::info!(
            active_connections = self.inner.connections.active_count(),
            "Stopped accepting connections, draining"
        );

        tokio::select! {
            _ = graceful.shutdown() => tracing::info!("All connections drained"),
            _ = wait_until(&mut lifecycle, |l| l.force_close) => {
                tracing::warn!(
                    remaining = connections.len(),
                    "Drain deadline reached, closing remaining connections"
                );
                connections.abort_all();
            }
        }

        while let Some(joined) = connections.join_next().await {
            log_join(joined);
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Stop accepting and wait for the accept loop to drain, at most until
    /// `deadline`. Past the deadline remaining connections are closed and
    /// [`ServerError::DeadlineExceeded`] is returned once they are gone.
    ///
    /// Calling this before `serve` closes the server immediately.
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), ServerError> {
        let mut lifecycle = self.inner.lifecycle.subscribe();
        self.inner.lifecycle.send_if_modified(|l| {
            if l.state != ServerState::Running {
                return false;
            }
            l.state = if l.serving {
                ServerState::Draining
            } else {
                ServerState::Closed
            };
            true
        });

        let closed = |l: &Lifecycle| l.state == ServerState::Closed;
        if tokio::time::timeout_at(deadline, wait_until(&mut lifecycle, closed))
            .await
            .is_ok()
        {
            return Ok(());
        }

        let remaining = self.inner.connections.active_count();
        self.inner.lifecycle.send_modify(|l| l.force_close = true);
        wait_until(&mut lifecycle, closed).await;
        Err(ServerError::DeadlineExceeded { remaining })
    }

    fn claim(&self) -> Result<(), ServerError> {
        let mut refused = None;
        self.inner.lifecycle.send_if_modified(|l| match (l.state, l.serving) {
            (ServerState::Running, false) => {
                l.serving = true;
                true
            }
            (ServerState::Running, true) => {
                refused = Some(ServerError::AlreadyServing);
                false
            }
            _ => {
                refused = Some(ServerError::Closed);
                false
            }
        });
        refused.map_or(Ok(()), Err)
    }
}

impl Default for ServerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulServer for ServerHandle {
    type Error = ServerError;

    fn shutdown(&self, deadline: Instant) -> impl Future<Output = Result<(), ServerError>> + Send {
        ServerHandle::shutdown(self, deadline)
    }
}

/// Marks the server closed when the accept loop ends, even if the `serve`
/// future is dropped early.
struct CloseOnDrop<'a>(&'a watch::Sender<Lifecycle>);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|l| {
            l.state = ServerState::Closed;
            l.serving = false;
        });
    }
}

fn with_peer(request: Request<Incoming>, peer: SocketAddr) -> Request<Body> {
    let mut request = request.map(Body::new);
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

async fn wait_until(
    lifecycle: &mut watch::Receiver<Lifecycle>,
    predicate: impl FnMut(&Lifecycle) -> bool,
) {
    // The sender lives in the handle, so this only errs once nobody can
    // change the state any more.
    let _ = lifecycle.wait_for(predicate).await;
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Connection task panicked");
        }
    }
}
