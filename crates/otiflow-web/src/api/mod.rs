mod chat;
mod data;
mod history;
mod insights;
mod runs;
mod workflows;

use axum::{Router, http::StatusCode};
use otiflow_core::Error;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/workflows", workflows::router())
        .nest("/trigger-workflow", runs::router())
        .nest("/data/raw", data::raw_router())
        .nest("/query-data", data::query_router())
        .nest("/insights", insights::router())
        .nest("/history", history::router())
        .nest("/chatbot", chat::router())
}

/// Maps a core error onto the response the caller sees.
pub(crate) fn core_error(e: Error) -> (StatusCode, String) {
    match e {
        Error::WorkflowNotFound(_) => (
            StatusCode::NOT_FOUND,
            "Workflow not found or access denied".to_string(),
        ),
        Error::InvalidWorkflow(_) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        Error::RejectedQuery(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        _ => {
            tracing::error!(error = %e, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
