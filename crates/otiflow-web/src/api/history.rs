use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use otiflow_core::WorkflowLog;
use serde::Deserialize;

use super::core_error;
use crate::state::AppState;
use crate::user::CurrentUser;

const DEFAULT_HISTORY_LIMIT: i64 = 5;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(recent_history))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    limit: Option<i64>,
}

async fn recent_history(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<WorkflowLog>>, (StatusCode, String)> {
    let logs = state
        .store
        .recent_logs_for_user(user_id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await
        .map_err(core_error)?;
    Ok(Json(logs))
}
