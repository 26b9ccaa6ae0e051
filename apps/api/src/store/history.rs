use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::orchestrator::PipelineReport;

/// Which form started a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchKind {
    /// Free-text or form-driven ingredient discovery.
    Finder,
    /// Single-ingredient analysis.
    DeepSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub prompt: String,
    pub kind: SearchKind,
    pub timestamp: DateTime<Utc>,
    /// Validated ingredients the run produced; zero when discovery did not structure.
    pub ingredient_count: usize,
    pub summary_state: String,
    /// Every stage slot the run produced, raw text included.
    pub response: PipelineReport,
}

impl HistoryEntry {
    pub fn from_report(prompt: &str, kind: SearchKind, report: &PipelineReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            kind,
            timestamp: Utc::now(),
            ingredient_count: report.ingredients.structured().map_or(0, Vec::len),
            summary_state: report.actionable_summary.state_name().to_string(),
            response: report.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ingredient;
    use crate::pipeline::outcome::StageResult;

    #[test]
    fn test_entry_counts_structured_ingredients() {
        let report = PipelineReport::new(
            StageResult::Structured {
                value: vec![Ingredient {
                    name: "Niacinamide".to_string(),
                    function: "Brightening".to_string(),
                    clinical_studies: None,
                    market_trend_analysis: None,
                }],
                raw: "[]".to_string(),
            },
            StageResult::skipped("test"),
            StageResult::NotRun,
        );

        let entry = HistoryEntry::from_report("serum", SearchKind::Finder, &report);
        assert_eq!(entry.ingredient_count, 1);
        assert_eq!(entry.summary_state, "skipped");
        assert_eq!(entry.response, report);

        let persisted = serde_json::to_string(&entry).unwrap();
        let restored: HistoryEntry = serde_json::from_str(&persisted).unwrap();
        assert_eq!(restored, entry);
        assert_eq!(
            restored.response.ingredients.structured().unwrap()[0].name,
            "Niacinamide"
        );
        assert_eq!(restored.response.ingredients.raw(), Some("[]"));
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let report = PipelineReport::new(
            StageResult::Failed {
                code: "UPSTREAM_UNAVAILABLE".to_string(),
                message: "down".to_string(),
            },
            StageResult::skipped("test"),
            StageResult::NotRun,
        );
        let entry = HistoryEntry::from_report("retinol", SearchKind::DeepSearch, &report);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["kind"], "deepSearch");
        assert_eq!(json["ingredientCount"], 0);
        assert!(json["timestamp"].is_string());
    }
}
