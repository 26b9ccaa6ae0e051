use serde::{Deserialize, Serialize};

/// A single suggested ingredient produced by the discovery stage.
///
/// `name` identifies the ingredient within one batch. Batches are replaced
/// wholesale by the next search, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_studies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_trend_analysis: Option<String>,
}

/// Actionable insights derived from an ingredient batch. Every bucket may be
/// empty but the shape is fixed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionableSummary {
    #[serde(default)]
    pub selling_points: Vec<String>,
    #[serde(default)]
    pub cautions: Vec<String>,
    #[serde(default)]
    pub market_opportunities: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl ActionableSummary {
    pub fn is_empty(&self) -> bool {
        self.selling_points.is_empty()
            && self.cautions.is_empty()
            && self.market_opportunities.is_empty()
            && self.next_steps.is_empty()
    }
}

/// Whether the suggested ingredients satisfy one user-selected filter.
///
/// `status == None` means the answer could not be determined from the
/// available information. That is a valid outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfirmation {
    pub name: String,
    pub status: Option<bool>,
    pub explanation: String,
}

/// The `{status, explanation}` pair the model returns per filter, before the
/// filter name is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub status: Option<bool>,
    pub explanation: String,
}
