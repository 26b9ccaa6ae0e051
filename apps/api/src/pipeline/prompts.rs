//! Prompt builder for every pipeline stage.
//!
//! Templates are constants with `{placeholder}` slots filled by `build`.
//! Cross-cutting output-format fragments live in `llm_client::prompts`.

use serde::{Deserialize, Serialize};

use crate::llm_client::prompts::{JSON_ARRAY_ONLY, JSON_OBJECT_ONLY};
use crate::pipeline::schema::SchemaKind;

/// Stage 1 template. Replace: {request}, {filters_block}, {format_instruction}
pub const INGREDIENT_DISCOVERY_TEMPLATE: &str = r#"Based on the following request, identify key ingredients and provide their details.
Each description should be as concise as possible while being informative. For 'clinicalStudies' provide only 2-3 key findings, or 'N/A' if none are readily available. For 'marketTrendAnalysis', provide a brief 1-2 sentence summary of its popularity on TikTok, Instagram, and YouTube.

Request: "{request}"
{filters_block}
{format_instruction}"#;

/// Stage 2 template. Replace: {analysis}, {format_instruction}
pub const ACTIONABLE_SUMMARY_TEMPLATE: &str = r#"Based on the following structured ingredient analysis, extract and summarize the most crucial actionable insights for a small beauty business owner looking to formulate new products.

Structured Ingredient Analysis:
{analysis}

Return a JSON object with exactly these keys, each holding an array of short strings:
"sellingPoints", "cautions", "marketOpportunities", "nextSteps".

{format_instruction}"#;

/// Filter confirmation template. Replace: {request}, {filter_list}, {format_instruction}
pub const FILTER_CONFIRMATION_TEMPLATE: &str = r#"The user requested ingredient suggestions with the following constraints applied as strict filters.

Request: "{request}"

Filters:
{filter_list}

For EVERY filter listed above, report whether the ingredients suggested for this request satisfy it. Return a JSON object of the form:
{"appliedFilters": {"<filter name>": {"status": true, "explanation": "..."}}}

Status rules:
- true: every suggested ingredient satisfies the filter
- false: at least one suggested ingredient does not satisfy the filter
- null: it cannot be determined from the available information

Use the filter names exactly as written above as keys. Keep each explanation to 1-2 sentences.

{format_instruction}"#;

const FILTERS_HEADER: &str =
    "The suggested ingredients MUST satisfy every one of these strict criteria:";

/// Product parameters collected by the finder form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryParams {
    pub category: String,
    pub product_type: String,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default = "default_count")]
    pub count: u8,
    #[serde(default)]
    pub include_clinical_studies: bool,
    #[serde(default = "default_true")]
    pub connect_to_market_trend: bool,
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_count() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

/// Parameters for a single-ingredient deep search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSearchParams {
    pub ingredient_name: String,
    #[serde(default)]
    pub extra_details: Option<String>,
}

/// What to build, with the inputs each prompt needs.
#[derive(Debug, Clone)]
pub enum PromptKind<'a> {
    IngredientDiscovery {
        request: &'a str,
        filters: &'a [String],
    },
    ActionableSummary {
        analysis: &'a str,
    },
    FilterConfirmation {
        filters: &'a [String],
        request: &'a str,
    },
}

impl PromptKind<'_> {
    /// The output contract a prompt of this kind asks for.
    pub fn schema(&self) -> SchemaKind {
        match self {
            PromptKind::IngredientDiscovery { .. } => SchemaKind::IngredientList,
            PromptKind::ActionableSummary { .. } => SchemaKind::ActionableSummary,
            PromptKind::FilterConfirmation { .. } => SchemaKind::FilterConfirmationMap,
        }
    }
}

/// A prompt paired with the schema it asks for. Lives for one call.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub prompt_text: String,
    pub expected_schema: SchemaKind,
}

impl PromptRequest {
    pub fn new(kind: &PromptKind<'_>) -> Self {
        Self {
            prompt_text: build(kind),
            expected_schema: kind.schema(),
        }
    }
}

/// Fills the template for `kind`.
pub fn build(kind: &PromptKind<'_>) -> String {
    match kind {
        PromptKind::IngredientDiscovery { request, filters } => fill(
            INGREDIENT_DISCOVERY_TEMPLATE,
            &[
                ("format_instruction", JSON_ARRAY_ONLY),
                ("filters_block", filters_block(filters).as_str()),
                ("request", request.trim()),
            ],
        ),
        PromptKind::ActionableSummary { analysis } => fill(
            ACTIONABLE_SUMMARY_TEMPLATE,
            &[
                ("format_instruction", JSON_OBJECT_ONLY),
                ("analysis", analysis.trim()),
            ],
        ),
        PromptKind::FilterConfirmation { filters, request } => fill(
            FILTER_CONFIRMATION_TEMPLATE,
            &[
                ("format_instruction", JSON_OBJECT_ONLY),
                ("filter_list", bullet_list(filters).as_str()),
                ("request", request.trim()),
            ],
        ),
    }
}

/// Substitutes `{slot}` placeholders in a single pass over `template`.
/// Inserted values are copied verbatim and never scanned for placeholders.
fn fill(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let slot = slots.iter().find(|(name, _)| {
            after.starts_with(name) && after[name.len()..].starts_with('}')
        });
        match slot {
            Some((name, value)) => {
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Turns finder form params into the natural-language request sentence.
pub fn describe_request(params: &DiscoveryParams) -> String {
    let mut request = format!(
        "Suggest {} key ingredients for a {} {} product.",
        params.count,
        params.product_type.trim(),
        params.category.trim()
    );

    if let Some(function) = params
        .function
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
    {
        request.push_str(&format!(" Its primary function should be to {function}."));
    }

    if params.include_clinical_studies {
        request.push_str(
            " Please include scientific evidence or mention relevant clinical studies for each ingredient's benefits.",
        );
    }

    if params.connect_to_market_trend {
        request.push_str(
            " Also, ensure the suggested ingredients are currently trending or gaining popularity in the market.",
        );
    }

    request.push_str(" Explain the function and benefits of each suggested ingredient.");
    request
}

/// Builds the request sentence for a single-ingredient deep search.
pub fn describe_deep_search(params: &DeepSearchParams) -> String {
    let mut request = format!(
        "Provide a comprehensive deep search analysis for the cosmetic ingredient \"{}\".",
        params.ingredient_name.trim()
    );

    match params
        .extra_details
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        Some(details) => request.push_str(&format!(" Specifically address: {details}.")),
        None => request.push_str(
            " Include its primary functions, benefits, typical usage concentrations, potential side effects, regulatory status (e.g., FDA, EU), and if available, key suppliers or trending applications.",
        ),
    }

    request
}

fn filters_block(filters: &[String]) -> String {
    let active: Vec<&String> = filters.iter().filter(|f| !f.trim().is_empty()).collect();
    if active.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = active.iter().map(|f| format!("- {}", f.trim())).collect();
    format!("\n{FILTERS_HEADER}\n{}\n", lines.join("\n"))
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
