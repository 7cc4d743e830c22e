//! Response observation helpers.
//!
//! Handlers may attach an application error to the response they return;
//! observability stages read it back together with the status code. Neither
//! touches the response bytes.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use http_body::Body as _;

/// Application-reported error carried as a response extension.
#[derive(Clone)]
pub struct ResponseError(Arc<dyn StdError + Send + Sync>);

impl ResponseError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    pub fn get(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Debug for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// Attach and read back application errors on a response.
pub trait ResponseErrorExt {
    /// Record `error` on the response. The last recorded error wins.
    fn with_error<E>(self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static;

    fn response_error(&self) -> Option<&ResponseError>;
}

impl ResponseErrorExt for Response {
    fn with_error<E>(mut self, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.extensions_mut().insert(ResponseError::new(error));
        self
    }

    fn response_error(&self) -> Option<&ResponseError> {
        self.extensions().get::<ResponseError>()
    }
}

/// What an observer learns about a finished response.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub error: Option<ResponseError>,
    /// Exact body length when the body knows it up front.
    pub body_size: Option<u64>,
}

impl ResponseInfo {
    pub fn capture(response: &Response) -> Self {
        Self {
            status: response.status(),
            error: response.response_error().cloned(),
            body_size: response.body().size_hint().exact(),
        }
    }
}
