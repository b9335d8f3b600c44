//! Viewer identity extraction.
//!
//! Identity comes from the `x-viewer-id` header, set by whatever sits in
//! front of this server. A request without the header is anonymous.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use pulse_core::Identity;

use crate::error::ApiError;

pub const VIEWER_HEADER: &str = "x-viewer-id";

/// The possibly-anonymous viewer of a request.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Identity>);

impl Viewer {
    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }

    /// The identity, or `401` for anonymous requests.
    pub fn require(&self) -> Result<&Identity, ApiError> {
        self.0
            .as_ref()
            .ok_or_else(|| ApiError::from(pulse_core::Error::Unauthenticated))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(VIEWER_HEADER) else {
            return Ok(Viewer(None));
        };
        let viewer_id = value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ApiError::Unauthorized(format!("malformed {} header", VIEWER_HEADER)))?;
        Ok(Viewer(Some(Identity::new(viewer_id))))
    }
}
