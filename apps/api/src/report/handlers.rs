use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppJson};
use crate::report::theme::{Palette, ReportTheme};
use crate::report::{render_markdown, ReportSections};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// Comma-separated: query, ingredients, summary, raw.
    pub sections: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThemeUpdate {
    pub theme: ReportTheme,
}

#[derive(Debug, Serialize)]
pub struct ThemeResponse {
    pub theme: ReportTheme,
    pub palette: Palette,
    /// Every theme a client may select.
    pub available: &'static [ReportTheme],
}

impl From<ReportTheme> for ThemeResponse {
    fn from(theme: ReportTheme) -> Self {
        Self {
            theme,
            palette: theme.palette(),
            available: &ReportTheme::ALL,
        }
    }
}

/// GET /api/v1/report/theme
pub async fn handle_get_theme(
    State(state): State<AppState>,
) -> Result<Json<ThemeResponse>, AppError> {
    Ok(Json(state.store.theme().await.into()))
}

/// PUT /api/v1/report/theme
pub async fn handle_set_theme(
    State(state): State<AppState>,
    AppJson(req): AppJson<ThemeUpdate>,
) -> Result<Json<ThemeResponse>, AppError> {
    state.store.set_theme(req.theme).await;
    Ok(Json(req.theme.into()))
}

/// GET /api/v1/report
pub async fn handle_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let sections = match query.sections.as_deref() {
        Some(list) => ReportSections::parse(list).map_err(AppError::Validation)?,
        None => ReportSections::default(),
    };

    let results = state.store.snapshot().await;
    if results.submitted_prompt.is_none() && !results.ingredients.is_structured() {
        return Err(AppError::NotFound(
            "No results to report yet".to_string(),
        ));
    }

    let markdown = render_markdown(&results, sections, results.report_theme);
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"ingredient_report.md\"",
            ),
        ],
        markdown,
    ))
}
