use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use otiflow_core::assistant::translate_to_sql;
use otiflow_core::ingest::DEFAULT_ROW_LIMIT;
use otiflow_core::StoredSale;
use serde::{Deserialize, Serialize};

use super::core_error;
use crate::state::AppState;
use crate::user::CurrentUser;

pub fn raw_router() -> Router<AppState> {
    Router::new().route("/{id}", get(raw_rows))
}

pub fn query_router() -> Router<AppState> {
    Router::new().route("/", post(query_data))
}

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub workflow_id: i64,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub status: &'static str,
    pub sql: String,
    pub results: Vec<serde_json::Value>,
}

async fn raw_rows(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Query(query): Query<RawQuery>,
) -> Result<Json<Vec<StoredSale>>, (StatusCode, String)> {
    state.store.get_owned(user_id, id).await.map_err(core_error)?;
    let rows = state
        .registry
        .fetch_rows(id, query.limit.unwrap_or(DEFAULT_ROW_LIMIT))
        .await
        .map_err(core_error)?;
    Ok(Json(rows))
}

/// Translates a question into SQL over the caller's own relation and runs it.
async fn query_data(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    if req.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query must not be empty".to_string()));
    }

    state
        .store
        .get_owned(user_id, req.workflow_id)
        .await
        .map_err(core_error)?;
    let relation = state.registry.ensure(req.workflow_id).await.map_err(core_error)?;

    let sql = translate_to_sql(state.textgen(), &req.query, &relation).await;
    tracing::debug!(workflow_id = req.workflow_id, %sql, "translated query");

    let results = state
        .query_guard
        .run_select(state.storage.pool(), &sql, &relation)
        .await
        .map_err(core_error)?;

    Ok(Json(QueryResponse {
        status: "success",
        sql,
        results,
    }))
}
