//! Token bucket rate limiting stage.
//!
//! One bucket is shared by every request through the stage. A token is
//! refilled each `interval`, up to `burst` tokens; each admitted request
//! takes one. The bucket starts full.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::http::middleware::Stage;
use crate::observability::metrics;

/// Bucket contents. Only touched under the limiter's mutex.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant, capacity: f64, interval: Duration) {
        let refilled = if interval.is_zero() {
            capacity
        } else {
            now.saturating_duration_since(self.last_update).as_secs_f64() / interval.as_secs_f64()
        };
        self.tokens = (self.tokens + refilled).min(capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, interval: Duration) -> bool {
        self.refill(now, capacity, interval);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token bucket admission control.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    interval: Duration,
    limit: u32,
    burst: u32,
}

impl RateLimiter {
    /// `interval` is the time to refill one token. `limit` is the burst the
    /// sustained rate implies and `burst` the bucket capacity. A `burst`
    /// below `limit` is honored as given, so the limiter is stricter than the
    /// rate suggests.
    pub fn new(interval: Duration, limit: u32, burst: u32) -> Self {
        if burst < limit {
            tracing::warn!(
                limit,
                burst,
                "Rate limiter burst is below the nominal limit; requests will be limited more strictly"
            );
        }

        Self {
            bucket: Mutex::new(TokenBucket::new(f64::from(burst))),
            interval,
            limit,
            burst,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(Instant::now(), f64::from(self.burst), self.interval)
    }

    /// Tokens available right now, after refill.
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(Instant::now(), f64::from(self.burst), self.interval);
        bucket.tokens
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Turn this limiter into a pipeline stage.
    pub fn stage(self) -> Stage {
        Arc::new(self).into_stage()
    }

    /// Stage sharing this limiter. Useful when the caller wants to keep
    /// inspecting the bucket.
    pub fn into_stage(self: Arc<Self>) -> Stage {
        Stage::layer(axum::middleware::from_fn_with_state::<
            _,
            _,
            (State<Arc<RateLimiter>>, Request),
        >(self, rate_limit_middleware))
    }
}

/// Shorthand for `RateLimiter::new(interval, limit, burst).stage()`.
pub fn rate_limiter(interval: Duration, limit: u32, burst: u32) -> Stage {
    RateLimiter::new(interval, limit, burst).stage()
}

/// Admit the request or answer 429 without calling anything downstream.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "Rate limit exceeded");
        metrics::record_rate_limited();
        too_many_requests()
    }
}

fn too_many_requests() -> Response {
    let status = StatusCode::TOO_MANY_REQUESTS;
    (status, status.canonical_reason().unwrap_or("Too Many Requests")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test(start_paused = true)]
    async fn burst_then_reject_then_refill() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 2, 2);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 3, 3);
        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_intervals_accumulate() {
        let limiter = RateLimiter::new(Duration::from_millis(100), 1, 1);
        assert!(limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_below_limit_is_not_raised() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 5, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_burst_rejects_everything() {
        let limiter = RateLimiter::new(Duration::from_millis(1), 0, 0);
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn zero_interval_never_limits() {
        let limiter = RateLimiter::new(Duration::ZERO, 1, 1);
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn concurrent_callers_never_share_a_token() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(3600), 100, 100));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || (0..50).filter(|_| limiter.try_acquire()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert!(limiter.available() < 1.0);
        assert!(limiter.available() >= 0.0);
    }

    #[test]
    fn rejection_is_plain_text_429() {
        let response = too_many_requests();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
    }
}
