//! # pulse-api
//!
//! HTTP surface of the live dashboard: per-viewer live sessions behind JSON
//! endpoints, producer ingestion, and an SSE stream of raw inserts.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use pulse_core::ChangeFeed;
use pulse_live::{AlertRuleService, AuditTrail, Backend, SessionConfig};

pub use error::ApiError;
pub use rate_limit::GlobalRateLimiter;
pub use sessions::SessionManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    /// Raw feed for the SSE stream.
    pub feed: Arc<ChangeFeed>,
    pub sessions: Arc<SessionManager>,
    pub alerts: AlertRuleService,
    pub audit: AuditTrail,
    pub rate_limiter: Option<Arc<GlobalRateLimiter>>,
}

impl AppState {
    pub fn new(backend: Backend, feed: Arc<ChangeFeed>, config: SessionConfig) -> Self {
        let audit = AuditTrail::new(backend.audit.clone(), backend.roles.clone());
        let alerts = AlertRuleService::new(backend.alerts.clone(), audit.clone());
        Self {
            sessions: Arc::new(SessionManager::new(backend.clone(), config)),
            backend,
            feed,
            alerts,
            audit,
            rate_limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Option<Arc<GlobalRateLimiter>>) -> Self {
        self.rate_limiter = limiter;
        self
    }
}

/// Time-ordered request correlation ids.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Parse a comma-separated origin list, skipping invalid entries.
pub fn parse_allowed_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Invalid CORS origin '{}': {}", s, e);
                None
            }
        })
        .collect()
}

fn cors_layer() -> CorsLayer {
    let raw = std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".into());
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parse_allowed_origins(&raw)))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(auth::VIEWER_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    use handlers::{alerts, audit, events, health, notifications, stream};

    let api = Router::new()
        .route("/health", get(health::health_check))
        .route("/events", get(events::get_events).post(events::ingest_event))
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::ingest_notification),
        )
        .route(
            "/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/:id/read", post(notifications::mark_read))
        .route("/notifications/:id/dismiss", post(notifications::dismiss))
        .route("/alerts", get(alerts::list_alerts).post(alerts::create_alert))
        .route(
            "/alerts/:id",
            patch(alerts::update_alert).delete(alerts::delete_alert),
        )
        .route("/audit", get(audit::list_audit))
        .route("/stream", get(stream::sse_stream));

    Router::new()
        .nest("/api/v1", api)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors_layer())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allowed_origins() {
        let origins = parse_allowed_origins("https://a.example, http://localhost:3000 ,,");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[1].to_str().unwrap(), "http://localhost:3000");
        assert!(parse_allowed_origins("").is_empty());
    }
}
