use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use otiflow_core::assistant::summarize_anomaly;
use otiflow_core::{compute_kpis, detect_anomaly, AnomalyReport, KpiSnapshot};
use serde::{Deserialize, Serialize};

use super::core_error;
use crate::state::AppState;
use crate::user::CurrentUser;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_insights))
}

#[derive(Debug, Deserialize)]
pub struct InsightsQuery {
    workflow_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    pub status: &'static str,
    pub kpis: KpiSnapshot,
    pub anomaly: AnomalyReport,
    pub ai_summary_text: String,
}

/// KPIs over one owned workflow, or over all of the caller's workflows.
async fn get_insights(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<InsightsQuery>,
) -> Result<Json<InsightsResponse>, (StatusCode, String)> {
    let workflow_ids = match query.workflow_id {
        Some(id) => {
            state.store.get_owned(user_id, id).await.map_err(core_error)?;
            vec![id]
        }
        None => state
            .store
            .list_for_user(user_id)
            .await
            .map_err(core_error)?
            .into_iter()
            .map(|w| w.id)
            .collect(),
    };

    let relations = state.registry.ensure_all(&workflow_ids).await.map_err(core_error)?;
    let kpis = compute_kpis(state.storage.pool(), &relations)
        .await
        .map_err(core_error)?;
    let anomaly = detect_anomaly(&kpis);
    let ai_summary_text = summarize_anomaly(state.textgen(), &anomaly).await;

    Ok(Json(InsightsResponse {
        status: "success",
        kpis,
        anomaly,
        ai_summary_text,
    }))
}
