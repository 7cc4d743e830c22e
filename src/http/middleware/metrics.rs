//! Request metrics stage.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::http::middleware::Stage;
use crate::http::response::ResponseInfo;
use crate::observability::metrics;

/// Stage recording in-flight, count, latency and size metrics for every
/// request that reaches it. Building it any number of times is fine: metric
/// handles are resolved by name on the installed recorder.
pub fn track_metrics() -> Stage {
    Stage::from_fn(record)
}

async fn record(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let start = Instant::now();

    let in_flight = metrics::InFlight::enter();
    let response = next.run(request).await;
    drop(in_flight);

    let info = ResponseInfo::capture(&response);
    metrics::record_request(&method, info.status.as_u16(), start, info.body_size);
    response
}
