//! Event window read and producer ingestion.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use pulse_core::defaults::HISTOGRAM_WIDTH;
use pulse_core::{Event, NewEvent};

use crate::auth::Viewer;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WindowResponse {
    /// Newest first.
    pub events: Vec<Event>,
    pub histogram: Vec<bool>,
    pub capacity: usize,
}

/// The viewer's event window. Anonymous viewers share one window.
pub async fn get_events(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<Json<WindowResponse>, ApiError> {
    let session = state.sessions.session(viewer.identity()).await?;
    Ok(Json(WindowResponse {
        events: session.window_snapshot(),
        histogram: session.histogram(HISTOGRAM_WIDTH),
        capacity: session.config().window_capacity,
    }))
}

/// Append an analytics event. Live windows pick it up from the push channel.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(req): Json<NewEvent>,
) -> Result<impl IntoResponse, ApiError> {
    if req.kind.trim().is_empty() {
        return Err(ApiError::BadRequest("event kind must not be empty".into()));
    }
    let event = state.backend.events.insert(req).await?;
    tracing::debug!(
        subsystem = "api",
        component = "events",
        op = "ingest",
        event_id = %event.id,
        kind = event.kind.as_str(),
        "Event ingested"
    );
    Ok((StatusCode::CREATED, Json(event)))
}
