use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, AppJson};
use crate::models::{ActionableSummary, FilterConfirmation, Ingredient};
use crate::pipeline::orchestrator::{
    active_filters, DiscoveryRequest, PipelineReport, PipelineStatus,
};
use crate::pipeline::outcome::{StageError, StageOutput, StageResult};
use crate::pipeline::prompts::{
    describe_deep_search, describe_request, DeepSearchParams, DiscoveryParams,
};
use crate::state::AppState;
use crate::store::history::SearchKind;

const MAX_INGREDIENT_COUNT: u8 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub active_filters: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryRequest {
    /// Falls back to the stored validated ingredients when absent.
    #[serde(default)]
    pub ingredients: Option<Vec<Ingredient>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfirmRequest {
    #[serde(default)]
    pub active_filters: Vec<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub history_id: Uuid,
    pub submitted_prompt: String,
    /// Set when a later stage failed after an earlier one succeeded.
    pub partial_failure: bool,
    #[serde(flatten)]
    pub report: PipelineReport,
}

/// POST /api/v1/ingredients/discover
pub async fn handle_discover(
    State(state): State<AppState>,
    AppJson(req): AppJson<DiscoverRequest>,
) -> Result<Json<PipelineResponse>, AppError> {
    let prompt = req
        .prompt
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::Validation("prompt is required".to_string()))?;

    let request = DiscoveryRequest::new(prompt, req.active_filters);
    Ok(Json(run_pipeline(&state, request, SearchKind::Finder).await))
}

/// POST /api/v1/ingredients/find
pub async fn handle_find(
    State(state): State<AppState>,
    AppJson(params): AppJson<DiscoveryParams>,
) -> Result<Json<PipelineResponse>, AppError> {
    if params.category.trim().is_empty() {
        return Err(AppError::Validation("category is required".to_string()));
    }
    if params.product_type.trim().is_empty() {
        return Err(AppError::Validation("productType is required".to_string()));
    }
    if params.count == 0 || params.count > MAX_INGREDIENT_COUNT {
        return Err(AppError::Validation(format!(
            "count must be between 1 and {MAX_INGREDIENT_COUNT}"
        )));
    }

    let request = DiscoveryRequest::new(describe_request(&params), params.filters);
    Ok(Json(run_pipeline(&state, request, SearchKind::Finder).await))
}

/// POST /api/v1/ingredients/deep-search
pub async fn handle_deep_search(
    State(state): State<AppState>,
    AppJson(params): AppJson<DeepSearchParams>,
) -> Result<Json<PipelineResponse>, AppError> {
    if params.ingredient_name.trim().is_empty() {
        return Err(AppError::Validation("ingredientName is required".to_string()));
    }

    let request = DiscoveryRequest::new(describe_deep_search(&params), Vec::new());
    Ok(Json(
        run_pipeline(&state, request, SearchKind::DeepSearch).await,
    ))
}

/// POST /api/v1/summary
pub async fn handle_summary(
    State(state): State<AppState>,
    AppJson(req): AppJson<SummaryRequest>,
) -> Result<Json<StageResult<ActionableSummary>>, AppError> {
    let ingredients = match req.ingredients {
        Some(list) => list,
        None => state.store.validated_ingredients().await.unwrap_or_default(),
    };
    if ingredients.is_empty() {
        return Err(AppError::Validation(
            "no validated ingredients to summarize".to_string(),
        ));
    }

    let result = state.orchestrator.run_actionable_summary(&ingredients).await;
    let slot = match settle(result) {
        Ok(slot) => slot,
        Err((slot, e)) => {
            state.store.record_summary(slot).await;
            return Err(e);
        }
    };
    state.store.record_summary(slot.clone()).await;
    Ok(Json(slot))
}

/// POST /api/v1/filters/confirm
pub async fn handle_confirm_filters(
    State(state): State<AppState>,
    AppJson(req): AppJson<FilterConfirmRequest>,
) -> Result<Json<StageResult<Vec<FilterConfirmation>>>, AppError> {
    let filters = active_filters(req.active_filters);
    if filters.is_empty() {
        return Err(AppError::Validation(
            "at least one active filter is required".to_string(),
        ));
    }

    let request = match req.prompt.filter(|p| !p.trim().is_empty()) {
        Some(prompt) => prompt,
        None => state
            .store
            .snapshot()
            .await
            .submitted_prompt
            .unwrap_or_default(),
    };

    let result = state
        .orchestrator
        .run_filter_confirmation(&filters, &request)
        .await;
    let slot = match settle(result) {
        Ok(slot) => slot,
        Err((slot, e)) => {
            state.store.record_filters(slot).await;
            return Err(e);
        }
    };
    state.store.record_filters(slot.clone()).await;
    Ok(Json(slot))
}

async fn run_pipeline(
    state: &AppState,
    request: DiscoveryRequest,
    kind: SearchKind,
) -> PipelineResponse {
    let report = state.orchestrator.run(&request).await;
    let entry = state
        .store
        .record_pipeline(&request.prompt, kind, &report)
        .await;

    PipelineResponse {
        history_id: entry.id,
        submitted_prompt: request.prompt,
        partial_failure: report.status == PipelineStatus::PartialFailure,
        report,
    }
}

/// Splits a single-stage result into the slot to record and, on failure, the
/// error to return. The failed slot is still recorded so raw text survives.
fn settle<T>(
    result: Result<StageOutput<T>, StageError>,
) -> Result<StageResult<T>, (StageResult<T>, AppError)> {
    match result {
        Ok(output) => Ok(StageResult::from_stage(Ok(output))),
        Err(e) => Err((StageResult::from_error(&e), e.into())),
    }
}
