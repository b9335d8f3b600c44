//! Optional global rate limiting.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use governor::{Quota, RateLimiter};

use pulse_core::defaults::{RATE_LIMIT_PERIOD_SECS, RATE_LIMIT_REQUESTS};

use crate::AppState;

/// Global rate limiter type (direct quota, not keyed per client).
pub type GlobalRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Build a limiter allowing `requests` per `period`. `None` for a zero quota.
pub fn limiter(requests: u32, period: Duration) -> Option<Arc<GlobalRateLimiter>> {
    let burst = NonZeroU32::new(requests)?;
    let quota = Quota::with_period(period)?.allow_burst(burst);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Limiter from `RATE_LIMIT_ENABLED`, `RATE_LIMIT_REQUESTS` and
/// `RATE_LIMIT_PERIOD_SECS`. Disabled unless explicitly enabled.
pub fn limiter_from_env() -> Option<Arc<GlobalRateLimiter>> {
    let enabled = std::env::var("RATE_LIMIT_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    let requests: u64 = std::env::var("RATE_LIMIT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(RATE_LIMIT_REQUESTS);
    let period: u64 = std::env::var("RATE_LIMIT_PERIOD_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(RATE_LIMIT_PERIOD_SECS);
    limiter(
        u32::try_from(requests).unwrap_or(u32::MAX),
        Duration::from_secs(period),
    )
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            tracing::warn!(subsystem = "api", component = "rate_limit", "Rate limit exceeded");
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_quota_disables() {
        assert!(limiter(0, Duration::from_secs(60)).is_none());
        assert!(limiter(10, Duration::ZERO).is_none());
    }

    #[test]
    fn test_burst_is_enforced() {
        let limiter = limiter(2, Duration::from_secs(60)).unwrap();
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
