//! Notification views and the read / dismiss lifecycle.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pulse_core::{NewNotification, Notification};
use pulse_live::MutationOutcome;

use crate::auth::Viewer;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Full,
    Compact,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub view: ViewMode,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    /// The last load failed and this is the last good snapshot.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MutationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<u64>,
    pub resynced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resync_error: Option<String>,
    pub unread_count: usize,
}

impl MutationResponse {
    fn new(outcome: MutationOutcome, unread_count: usize) -> Self {
        Self {
            changed: outcome.changed,
            resynced: outcome.resynced(),
            resync_error: outcome.resync_error.map(|e| e.to_string()),
            unread_count,
        }
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<ListQuery>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let session = state.sessions.session(Some(viewer.require()?)).await?;
    let view = session.dashboard();
    let notifications = match query.view {
        ViewMode::Full => view.notifications,
        ViewMode::Compact => view.compact,
    };
    Ok(Json(NotificationsResponse {
        notifications,
        unread_count: view.unread_count,
        stale: view.stale,
        last_error: view.last_error,
    }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(Some(viewer.require()?)).await?;
    Ok(Json(serde_json::json!({
        "unread_count": session.unread_count(),
    })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = state.sessions.session(Some(viewer.require()?)).await?;
    let outcome = session.mark_read(id).await?;
    Ok(Json(MutationResponse::new(outcome, session.unread_count())))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = state.sessions.session(Some(viewer.require()?)).await?;
    let outcome = session.mark_all_read().await?;
    Ok(Json(MutationResponse::new(outcome, session.unread_count())))
}

pub async fn dismiss(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> Result<Json<MutationResponse>, ApiError> {
    let session = state.sessions.session(Some(viewer.require()?)).await?;
    let outcome = session.dismiss(id).await?;
    Ok(Json(MutationResponse::new(outcome, session.unread_count())))
}

/// Producer ingestion: store a notification for its owner.
pub async fn ingest_notification(
    State(state): State<AppState>,
    Json(req): Json<NewNotification>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("notification title must not be empty".into()));
    }
    let created = state.backend.notifications.insert(req).await?;
    tracing::info!(
        subsystem = "api",
        component = "notifications",
        op = "ingest",
        notification_id = %created.id,
        viewer_id = %created.owner_id,
        "Notification ingested"
    );
    Ok((StatusCode::CREATED, Json(created)))
}
