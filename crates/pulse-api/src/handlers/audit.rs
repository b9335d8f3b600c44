use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;

use pulse_live::{distinct_actions, AuditQuery};

use crate::auth::Viewer;
use crate::error::ApiError;
use crate::AppState;

/// Admin-only audit listing with the actions present for filtering.
pub async fn list_audit(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.audit.list(viewer.identity(), &query).await?;
    let actions = distinct_actions(&records);
    Ok(Json(serde_json::json!({
        "records": records,
        "actions": actions,
    })))
}
