//! Per-request access logging.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;

use crate::http::middleware::Stage;
use crate::http::response::ResponseInfo;

/// Stage emitting one "request processed" event per request, after the inner
/// stages have produced a response. Uses error level when the handler
/// attached a [`ResponseError`](crate::http::response::ResponseError).
pub fn access_log() -> Stage {
    Stage::from_fn(log_request)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().to_string();
    let protocol = request.version();
    let content_length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let remote_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = format!("{:.3} ms", start.elapsed().as_secs_f64() * 1000.0);
    let info = ResponseInfo::capture(&response);

    match info.error {
        Some(error) => tracing::error!(
            method = %method,
            remote_address = remote_address.map(tracing::field::display),
            path = %path,
            protocol = ?protocol,
            content_length,
            status = info.status.as_u16(),
            elapsed = %elapsed,
            error = %error,
            "request processed"
        ),
        None => tracing::info!(
            method = %method,
            remote_address = remote_address.map(tracing::field::display),
            path = %path,
            protocol = ?protocol,
            content_length,
            status = info.status.as_u16(),
            elapsed = %elapsed,
            "request processed"
        ),
    }

    response
}
