use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use otiflow_core::{NewWorkflow, Workflow, WorkflowLog, WorkflowUpdate};
use serde::Deserialize;

use super::core_error;
use crate::state::AppState;
use crate::user::CurrentUser;

const DEFAULT_LOG_LIMIT: i64 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route(
            "/{id}",
            get(get_workflow).patch(update_workflow).delete(delete_workflow),
        )
        .route("/{id}/logs", get(workflow_logs))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    limit: Option<i64>,
}

async fn list_workflows(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Workflow>>, (StatusCode, String)> {
    let workflows = state.store.list_for_user(user_id).await.map_err(core_error)?;
    Ok(Json(workflows))
}

async fn create_workflow(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<NewWorkflow>,
) -> Result<(StatusCode, Json<Workflow>), (StatusCode, String)> {
    let workflow = state.store.create(user_id, req).await.map_err(core_error)?;
    state.nudge_scheduler(workflow.id).await;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn get_workflow(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Workflow>, (StatusCode, String)> {
    let workflow = state.store.get_owned(user_id, id).await.map_err(core_error)?;
    Ok(Json(workflow))
}

async fn update_workflow(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<WorkflowUpdate>,
) -> Result<Json<Workflow>, (StatusCode, String)> {
    let workflow = state.store.update(user_id, id, req).await.map_err(core_error)?;
    state.nudge_scheduler(id).await;
    Ok(Json(workflow))
}

async fn delete_workflow(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.store.delete(user_id, id).await.map_err(core_error)?;
    state.nudge_scheduler(id).await;
    state.pipeline.forget(id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn workflow_logs(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<WorkflowLog>>, (StatusCode, String)> {
    state.store.get_owned(user_id, id).await.map_err(core_error)?;
    let logs = state
        .store
        .logs_for_workflow(id, query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await
        .map_err(core_error)?;
    Ok(Json(logs))
}
