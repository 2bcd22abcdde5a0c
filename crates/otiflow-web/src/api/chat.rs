use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use otiflow_core::assistant::chat_reply;
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::user::CurrentUser;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(chat))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

async fn chat(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message must not be empty".to_string()));
    }

    Ok(Json(ChatResponse {
        response: chat_reply(state.textgen(), &req.message).await,
    }))
}
