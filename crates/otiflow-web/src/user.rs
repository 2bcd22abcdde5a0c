use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

/// Extractor that identifies the caller from the `X-User-Id` header
///
/// Authentication happens in front of this service; a missing or malformed
/// id is rejected before any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub i64);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .ok_or((StatusCode::UNAUTHORIZED, "Missing X-User-Id header"))?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|&id| id > 0)
            .map(CurrentUser)
            .ok_or((StatusCode::UNAUTHORIZED, "Invalid X-User-Id header"))
    }
}
