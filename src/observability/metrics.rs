//! Metrics collection and exposition.
//!
//! # Metrics
//! - `in_flight_requests` (gauge): requests currently inside the metrics stage
//! - `http_requests_total` (counter): requests by status code and method
//! - `request_duration_seconds` (histogram): latency by method
//! - `response_size_bytes` (histogram): body size when known up front
//! - `http_requests_rate_limited_total` (counter): 429s from the rate limiter
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - The Prometheus recorder is installed at most once per process; later
//!   calls get the same handle back

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub const IN_FLIGHT_REQUESTS: &str = "in_flight_requests";
pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION: &str = "request_duration_seconds";
pub const RESPONSE_SIZE: &str = "response_size_bytes";
pub const RATE_LIMITED_TOTAL: &str = "http_requests_rate_limited_total";

const DURATION_BUCKETS: &[f64] = &[0.01, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const SIZE_BUCKETS: &[f64] = &[200.0, 500.0, 900.0, 1500.0];

static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to build Prometheus recorder: {0}")]
    Build(#[from] BuildError),

    #[error("a different metrics recorder is already installed")]
    RecorderInstalled,
}

/// Install the process-wide Prometheus recorder, optionally serving it over
/// HTTP at `listen`.
///
/// Idempotent: the first successful call wins and every later call returns
/// the same handle, whatever `listen` it passes. Serving requires a tokio
/// runtime.
pub fn install(listen: Option<SocketAddr>) -> Result<PrometheusHandle, MetricsError> {
    let mut slot = RECORDER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)?
        .set_buckets_for_metric(Matcher::Full(RESPONSE_SIZE.to_string()), SIZE_BUCKETS)?;

    let handle = match listen {
        Some(addr) => {
            let (recorder, exporter) = builder.with_http_listener(addr).build()?;
            let handle = recorder.handle();
            ::metrics::set_global_recorder(recorder).map_err(|_| MetricsError::RecorderInstalled)?;
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "Metrics exporter stopped");
                }
            });
            tracing::info!(address = %addr, "Metrics endpoint listening");
            handle
        }
        None => builder.install_recorder().map_err(|e| match e {
            BuildError::FailedToSetGlobalRecorder(_) => MetricsError::RecorderInstalled,
            other => MetricsError::Build(other),
        })?,
    };

    describe_metrics();
    *slot = Some(handle.clone());
    Ok(handle)
}

/// Install the recorder and serve it at `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<PrometheusHandle, MetricsError> {
    install(Some(addr))
}

fn describe_metrics() {
    describe_gauge!(
        IN_FLIGHT_REQUESTS,
        "A gauge of requests currently being served by the handler."
    );
    describe_counter!(REQUESTS_TOTAL, "A counter for requests to the handler.");
    describe_histogram!(
        REQUEST_DURATION,
        Unit::Seconds,
        "A histogram of latencies for requests."
    );
    describe_histogram!(
        RESPONSE_SIZE,
        Unit::Bytes,
        "A histogram of response sizes for requests."
    );
    describe_counter!(
        RATE_LIMITED_TOTAL,
        "Requests rejected by the rate limiter."
    );
}

/// Record a finished request.
pub fn record_request(method: &str, status: u16, start: Instant, body_size: Option<u64>) {
    counter!(REQUESTS_TOTAL, "code" => status.to_string(), "method" => method.to_owned())
        .increment(1);
    histogram!(REQUEST_DURATION, "method" => method.to_owned())
        .record(start.elapsed().as_secs_f64());
    if let Some(size) = body_size {
        histogram!(RESPONSE_SIZE).record(size as f64);
    }
}

pub fn record_rate_limited() {
    counter!(RATE_LIMITED_TOTAL).increment(1);
}

/// Keeps the in-flight gauge raised while alive.
#[derive(Debug)]
pub struct InFlight(());

impl InFlight {
    pub fn enter() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self(())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}
