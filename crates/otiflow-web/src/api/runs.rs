use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use otiflow_core::RunReport;

use super::core_error;
use crate::state::AppState;
use crate::user::CurrentUser;

pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", post(trigger_workflow))
}

/// Runs one check-and-ingest attempt now. A processing failure is a 400.
async fn trigger_workflow(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<RunReport>, (StatusCode, String)> {
    let report = state
        .pipeline
        .run_for_user(user_id, id)
        .await
        .map_err(core_error)?;

    if report.outcome.is_failure() {
        return Err((StatusCode::BAD_REQUEST, report.message));
    }
    Ok(Json(report))
}
