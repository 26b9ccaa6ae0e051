pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::pipeline::handlers as pipeline;
use crate::report::handlers as report;
use crate::state::AppState;
use crate::store::handlers as results;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Pipeline runs
        .route(
            "/api/v1/ingredients/discover",
            post(pipeline::handle_discover),
        )
        .route("/api/v1/ingredients/find", post(pipeline::handle_find))
        .route(
            "/api/v1/ingredients/deep-search",
            post(pipeline::handle_deep_search),
        )
        // Single stages
        .route("/api/v1/summary", post(pipeline::handle_summary))
        .route(
            "/api/v1/filters/confirm",
            post(pipeline::handle_confirm_filters),
        )
        // Stored results
        .route("/api/v1/results", get(results::handle_get_results))
        .route(
            "/api/v1/results/ingredients",
            delete(results::handle_clear_ingredients),
        )
        .route("/api/v1/results/reparse", post(results::handle_reparse))
        .route("/api/v1/history", get(results::handle_history))
        // Report export
        .route(
            "/api/v1/report/theme",
            get(report::handle_get_theme).put(report::handle_set_theme),
        )
        .route("/api/v1/report", get(report::handle_report))
        .with_state(state)
}
