//! Panic isolation.
//!
//! The only place in the pipeline where unwinding is caught. A panic below
//! this stage ends that one request with a 500; the connection, other
//! requests and the shutdown path are unaffected.

use std::any::Any;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use crate::http::middleware::{Handler, Stage};

pub fn recover_panics() -> Stage {
    Stage::new(|next| {
        Handler::new(
            ServiceBuilder::new()
                .map_response(into_axum_body)
                .layer(CatchPanicLayer::custom(on_panic))
                .service(next),
        )
    })
}

fn into_axum_body<B>(response: axum::http::Response<B>) -> Response
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    response.map(Body::new)
}

fn on_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&'static str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = message, "panic recovered: {}", message);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
