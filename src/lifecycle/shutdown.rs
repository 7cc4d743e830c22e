//! Shutdown coordination.
//!
//! A background task waits for the first termination request, asks the
//! server to drain within a deadline, then fires a [`CompletionSignal`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::lifecycle::signals::{OsSignals, SignalError, TerminationSignals};

/// Sink for the coordinator's two messages.
pub trait ShutdownLogger: Send + Sync {
    fn info(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Forwards to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl ShutdownLogger for TracingLogger {
    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!("{}", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!("{}", args);
    }
}

/// A server that can stop accepting work and drain by a deadline.
pub trait GracefulServer: Send + Sync + 'static {
    type Error: fmt::Display + Send;

    /// Stop accepting, wait for in-flight work until `deadline`, then close
    /// whatever is left. Returns an error when the deadline forced the close.
    fn shutdown(&self, deadline: Instant) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<T: GracefulServer> GracefulServer for Arc<T> {
    type Error = T::Error;

    fn shutdown(&self, deadline: Instant) -> impl Future<Output = Result<(), Self::Error>> + Send {
        T::shutdown(self, deadline)
    }
}

/// Fires once when the shutdown sequence has finished, successfully or not.
///
/// Cloning gives another waiter on the same event.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    rx: watch::Receiver<bool>,
}

impl CompletionSignal {
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for completion. Never returns if the coordinator stopped without
    /// observing a termination request.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|done| *done).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sending half of a [`CompletionSignal`]. Firing consumes it.
#[derive(Debug)]
struct CompletionTrigger {
    tx: watch::Sender<bool>,
}

impl CompletionTrigger {
    fn fire(self) {
        self.tx.send_replace(true);
    }
}

fn completion() -> (CompletionTrigger, CompletionSignal) {
    let (tx, rx) = watch::channel(false);
    (CompletionTrigger { tx }, CompletionSignal { rx })
}

/// Drives one server through drain-then-close on the first termination
/// request from `signals`.
pub struct ShutdownCoordinator<S> {
    wait_time: Duration,
    logger: Option<Arc<dyn ShutdownLogger>>,
    signals: S,
}

impl<S: TerminationSignals> ShutdownCoordinator<S> {
    /// A zero `wait_time` skips the drain and closes connections at once.
    pub fn new(wait_time: Duration, signals: S) -> Self {
        Self {
            wait_time,
            logger: None,
            signals,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ShutdownLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Spawn the background task. Must be called inside a tokio runtime.
    pub fn start<H: GracefulServer>(self, server: H) -> CompletionSignal {
        let (trigger, signal) = completion();
        tokio::spawn(self.run(server, trigger));
        signal
    }

    async fn run<H: GracefulServer>(mut self, server: H, trigger: CompletionTrigger) {
        let Some(signal) = self.signals.recv().await else {
            tracing::debug!("Termination signal source closed before any signal");
            return;
        };
        tracing::debug!(signal = %signal, "Termination signal received");
        self.info(format_args!("shutting down server, draining connections"));

        let shutdown = server.shutdown(deadline_after(self.wait_time));
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                result = &mut shutdown => break result,
                Some(signal) = self.signals.recv() => {
                    tracing::debug!(signal = %signal, "Already draining, ignoring termination signal");
                }
            }
        };

        if let Err(err) = result {
            self.error(format_args!("could not shut down server gracefully: {err}"));
        }

        trigger.fire();
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.info(args);
        }
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.error(args);
        }
    }
}

impl<S> fmt::Debug for ShutdownCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("wait_time", &self.wait_time)
            .field("logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

fn deadline_after(wait_time: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait_time)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Drain `server` on SIGINT or SIGTERM, waiting at most `wait_time`.
///
/// ```ignore
/// let handle = ServerHandle::new();
/// let done = start_graceful_shutdown(handle.clone(), Duration::from_secs(10), Some(Arc::new(TracingLogger)))?;
/// handle.serve(listener, handler).await?;
/// done.wait().await;
/// ```
pub fn start_graceful_shutdown<H: GracefulServer>(
    server: H,
    wait_time: Duration,
    logger: Option<Arc<dyn ShutdownLogger>>,
) -> Result<CompletionSignal, SignalError> {
    let mut coordinator = ShutdownCoordinator::new(wait_time, OsSignals::install()?);
    coordinator.logger = logger;
    Ok(coordinator.start(server))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::signals::Termination;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Default)]
    struct MockServer {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
        deadlines: Mutex<Vec<Instant>>,
    }

    impl GracefulServer for MockServer {
        type Error = &'static str;

        async fn shutdown(&self, deadline: Instant) -> Result<(), Self::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.deadlines.lock().unwrap().push(deadline);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err("deadline exceeded")
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct MemoryLogger {
        lines: Mutex<Vec<String>>,
    }

    impl ShutdownLogger for MemoryLogger {
        fn info(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().unwrap().push(format!("INFO {args}"));
        }

        fn error(&self, args: fmt::Arguments<'_>) {
            self.lines.lock().unwrap().push(format!("ERROR {args}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_signal_does_not_shut_down_twice() {
        let server = Arc::new(MockServer {
            delay: Duration::from_millis(100),
            ..MockServer::default()
        });
        let logger = Arc::new(MemoryLogger::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let done = ShutdownCoordinator::new(Duration::from_secs(5), rx)
            .with_logger(logger.clone())
            .start(Arc::clone(&server));

        tx.send(Termination::Interrupt).unwrap();
        tx.send(Termination::Terminate).unwrap();
        done.wait().await;

        assert!(done.is_complete());
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *logger.lines.lock().unwrap(),
            ["INFO shutting down server, draining connections"]
        );

        // The coordinator is gone; later signals go nowhere.
        let _ = tx.send(Termination::Interrupt);
        tokio::task::yield_now().await;
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_signal_no_completion() {
        let server = Arc::new(MockServer::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let done = ShutdownCoordinator::new(Duration::from_secs(1), rx).start(Arc::clone(&server));

        assert!(timeout(Duration::from_secs(30), done.wait()).await.is_err());
        assert!(!done.is_complete());
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_source_never_completes() {
        let server = Arc::new(MockServer::default());
        let (tx, rx) = mpsc::unbounded_channel::<Termination>();
        let done = ShutdownCoordinator::new(Duration::from_secs(1), rx).start(Arc::clone(&server));
        drop(tx);

        assert!(timeout(Duration::from_secs(30), done.wait()).await.is_err());
        assert_eq!(server.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_drain_is_logged_and_still_completes() {
        let server = Arc::new(MockServer {
            fail: true,
            ..MockServer::default()
        });
        let logger = Arc::new(MemoryLogger::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let done = ShutdownCoordinator::new(Duration::from_millis(10), rx)
            .with_logger(logger.clone())
            .start(Arc::clone(&server));

        tx.send(Termination::Terminate).unwrap();
        done.wait().await;

        let lines = logger.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            "ERROR could not shut down server gracefully: deadline exceeded"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_wait_time_after_the_signal() {
        let server = Arc::new(MockServer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let done = ShutdownCoordinator::new(Duration::from_secs(7), rx).start(Arc::clone(&server));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let signalled_at = Instant::now();
        tx.send(Termination::Interrupt).unwrap();
        done.wait().await;

        let deadlines = server.deadlines.lock().unwrap();
        assert_eq!(*deadlines, [signalled_at + Duration::from_secs(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn every_waiter_sees_completion() {
        let server = Arc::new(MockServer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let done = ShutdownCoordinator::new(Duration::from_secs(1), rx).start(Arc::clone(&server));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let done = done.clone();
                tokio::spawn(async move { done.wait().await })
            })
            .collect();

        tx.send(Termination::Interrupt).unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        // Waiting again after completion returns immediately.
        done.wait().await;
    }

    #[test]
    fn huge_wait_time_does_not_overflow() {
        let _ = deadline_after(Duration::MAX);
    }
}
