use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{ActionableSummary, FilterConfirmation, Ingredient};
use crate::pipeline::outcome::StageResult;
use crate::state::AppState;
use crate::store::history::HistoryEntry;

/// The current value of every pipeline slot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub submitted_prompt: Option<String>,
    pub ingredients: StageResult<Vec<Ingredient>>,
    pub actionable_summary: StageResult<ActionableSummary>,
    pub applied_filters: StageResult<Vec<FilterConfirmation>>,
}

#[derive(Debug, Serialize)]
pub struct ReparseResponse {
    pub recovered: usize,
    #[serde(flatten)]
    pub results: ResultsResponse,
}

/// GET /api/v1/results
pub async fn handle_get_results(
    State(state): State<AppState>,
) -> Result<Json<ResultsResponse>, AppError> {
    Ok(Json(current_results(&state).await))
}

/// DELETE /api/v1/results/ingredients
pub async fn handle_clear_ingredients(
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.store.clear_ingredients().await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/results/reparse
pub async fn handle_reparse(
    State(state): State<AppState>,
) -> Result<Json<ReparseResponse>, AppError> {
    let recovered = state.store.reparse().await;
    Ok(Json(ReparseResponse {
        recovered,
        results: current_results(&state).await,
    }))
}

/// GET /api/v1/history
pub async fn handle_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    Ok(Json(state.store.history().await))
}

async fn current_results(state: &AppState) -> ResultsResponse {
    let results = state.store.snapshot().await;
    ResultsResponse {
        submitted_prompt: results.submitted_prompt,
        ingredients: results.ingredients,
        actionable_summary: results.actionable_summary,
        applied_filters: results.applied_filters,
    }
}
