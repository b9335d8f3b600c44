//! Alert rule CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use pulse_core::{AlertRule, CreateAlertRuleRequest, UpdateAlertRuleRequest};
use pulse_live::Audited;

use crate::auth::Viewer;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AuditedResponse<T> {
    #[serde(flatten)]
    pub value: T,
    /// Set when the mutation succeeded but its audit record was not written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RuleBody {
    pub rule: AlertRule,
}

fn rule_response(audited: Audited<AlertRule>) -> AuditedResponse<RuleBody> {
    AuditedResponse {
        value: RuleBody {
            rule: audited.value,
        },
        audit_error: audited.audit_error.map(|e| e.to_string()),
    }
}

pub async fn list_alerts(
    State(state): State<AppState>,
    viewer: Viewer,
) -> Result<impl IntoResponse, ApiError> {
    let rules = state.alerts.list(viewer.identity()).await?;
    Ok(Json(serde_json::json!({ "rules": rules })))
}

pub async fn create_alert(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(req): Json<CreateAlertRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.alerts.create(viewer.identity(), req).await?;
    Ok((StatusCode::CREATED, Json(rule_response(created))))
}

/// Partial update. A body carrying only `is_active` is recorded as a toggle.
pub async fn update_alert(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAlertRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let only_toggle = req.name.is_none() && req.threshold.is_none() && req.channels.is_none();
    let updated = match req.is_active {
        Some(active) if only_toggle => state.alerts.toggle(viewer.identity(), id, active).await?,
        _ => state.alerts.update(viewer.identity(), id, req).await?,
    };
    Ok(Json(rule_response(updated)))
}

pub async fn delete_alert(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.alerts.delete(viewer.identity(), id).await?;
    Ok(Json(AuditedResponse {
        value: serde_json::json!({ "deleted": id }),
        audit_error: deleted.audit_error.map(|e| e.to_string()),
    }))
}
