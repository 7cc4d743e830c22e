//! Pipeline composition.
//!
//! A [`Stage`] turns the next handler into a new handler. Stages are applied
//! in registration order, each wrapping the previous result, so the stage
//! registered last is the outermost one:
//!
//! ```text
//! compose(handler, [a, b, c])  ==  c(b(a(handler)))
//!
//! request  → c → b → a → handler
//! response ← c ← b ← a ←
//! ```
//!
//! "Before" logic therefore runs in reverse registration order and "after"
//! logic runs in registration order.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

/// Type-erased request handler. Every stage wraps one and produces one.
pub type Handler = BoxCloneSyncService<Request, Response, Infallible>;

/// One composable unit of the pipeline.
#[derive(Clone)]
pub struct Stage {
    wrap: Arc<dyn Fn(Handler) -> Handler + Send + Sync>,
}

impl Stage {
    /// Build a stage from a raw handler-to-handler function.
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(wrap),
        }
    }

    /// Build a stage from any tower layer producing an infallible service.
    pub fn layer<L>(layer: L) -> Self
    where
        L: Layer<Handler> + Send + Sync + 'static,
        L::Service: Service<Request, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        Self::new(move |next| Handler::new(layer.layer(next)))
    }

    /// Build a stage from an async function that receives the request and
    /// the continuation. Not calling `next.run` short-circuits the pipeline.
    ///
    /// ```ignore
    /// let stage = Stage::from_fn(|request: Request, next: Next| async move {
    ///     // before
    ///     let response = next.run(request).await;
    ///     // after
    ///     response
    /// });
    /// ```
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self::layer(axum::middleware::from_fn::<F, (Request,)>(f))
    }

    /// Wrap `next` with this stage.
    pub fn apply(&self, next: Handler) -> Handler {
        (self.wrap)(next)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").finish_non_exhaustive()
    }
}

/// Wrap `terminal` with `stages`, first stage innermost.
///
/// Each call builds a fresh handler; nothing is shared between two composed
/// handlers except the state the stages themselves close over.
pub fn compose<S, I>(terminal: S, stages: I) -> Handler
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    I: IntoIterator<Item = Stage>,
{
    stages
        .into_iter()
        .fold(Handler::new(terminal), |next, stage| stage.apply(next))
}

/// Ordered, reusable list of stages.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareChain {
    stages: Vec<Stage>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage. Later stages wrap earlier ones.
    pub fn push(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Builder form of [`MiddlewareChain::push`].
    pub fn with(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Compose the registered stages around `terminal`.
    pub fn build<S>(&self, terminal: S) -> Handler
    where
        S: Service<Request, Response = Response, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        compose(terminal, self.stages.iter().cloned())
    }
}
