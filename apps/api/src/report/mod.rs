// Report export: renders the stored results as a themed markdown document.
// Only sections the caller selects are included.

pub mod handlers;
pub mod theme;

use crate::models::{ActionableSummary, Ingredient};
use crate::pipeline::outcome::StageResult;
use crate::store::Results;

use theme::ReportTheme;

const UNPARSED_BANNER: &str =
    "> **Note:** The response could not be fully parsed. The raw output is shown instead.";

/// Which parts of the results go into the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSections {
    pub query: bool,
    pub ingredients: bool,
    pub summary: bool,
    pub raw_response: bool,
}

impl Default for ReportSections {
    fn default() -> Self {
        Self {
            query: true,
            ingredients: true,
            summary: true,
            raw_response: false,
        }
    }
}

impl ReportSections {
    /// Parses a comma-separated list such as `query,ingredients,raw`.
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut sections = ReportSections {
            query: false,
            ingredients: false,
            summary: false,
            raw_response: false,
        };

        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "query" => sections.query = true,
                "ingredients" => sections.ingredients = true,
                "summary" => sections.summary = true,
                "raw" | "rawResponse" => sections.raw_response = true,
                other => return Err(format!("unknown report section '{other}'")),
            }
        }

        if sections.is_empty() {
            return Err("select at least one report section".to_string());
        }
        Ok(sections)
    }

    pub fn is_empty(&self) -> bool {
        !(self.query || self.ingredients || self.summary || self.raw_response)
    }
}

pub fn render_markdown(results: &Results, sections: ReportSections, theme: ReportTheme) -> String {
    let palette = theme.palette();
    let mut out = String::new();

    out.push_str("---\n");
    out.push_str("title: Ingredient Intelligence Report\n");
    out.push_str(&format!("theme: {}\n", theme.as_str()));
    out.push_str(&format!("primaryColor: \"{}\"\n", palette.primary));
    out.push_str(&format!("accentColor: \"{}\"\n", palette.accent));
    out.push_str(&format!("backgroundColor: \"{}\"\n", palette.background));
    out.push_str(&format!("textColor: \"{}\"\n", palette.text));
    out.push_str(&format!("lightTextColor: \"{}\"\n", palette.light_text));
    out.push_str(&format!("borderColor: \"{}\"\n", palette.border));
    out.push_str("---\n\n# Ingredient Intelligence Report\n");

    if sections.query {
        out.push_str("\n## Latest Insight\n\n");
        match results.submitted_prompt.as_deref() {
            Some(prompt) => out.push_str(&format!("> {}\n", prompt.replace('\n', "\n> "))),
            None => out.push_str("_No search has been submitted yet._\n"),
        }
    }

    if sections.ingredients {
        out.push_str("\n## Suggested Ingredients\n\n");
        render_slot(&mut out, &results.ingredients, "Ingredient discovery", render_ingredients);
    }

    if sections.summary {
        out.push_str("\n## Actionable Summary for Your Business\n\n");
        render_slot(
            &mut out,
            &results.actionable_summary,
            "The actionable summary",
            render_summary,
        );
    }

    if sections.raw_response {
        out.push_str("\n## Raw AI Response\n\n");
        match results.ingredients.raw() {
            Some(raw) => push_raw(&mut out, raw),
            None => out.push_str("_No raw response is available._\n"),
        }
    }

    out
}

fn render_slot<T>(
    out: &mut String,
    slot: &StageResult<T>,
    label: &str,
    render: fn(&mut String, &T),
) {
    match slot {
        StageResult::Structured { value, .. } => render(out, value),
        StageResult::Unparsed { raw, .. } => {
            out.push_str(UNPARSED_BANNER);
            out.push_str("\n\n");
            push_raw(out, raw);
        }
        StageResult::NotRun => out.push_str(&format!("_{label} has not run yet._\n")),
        StageResult::Failed { message, .. } => {
            out.push_str(&format!("_{label} failed: {message}_\n"))
        }
        StageResult::Skipped { reason } => {
            out.push_str(&format!("_{label} was skipped: {reason}._\n"))
        }
    }
}

fn render_ingredients(out: &mut String, ingredients: &Vec<Ingredient>) {
    if ingredients.is_empty() {
        out.push_str("_No ingredients were suggested._\n");
        return;
    }

    for ingredient in ingredients {
        out.push_str(&format!("### {}\n\n{}\n\n", ingredient.name, ingredient.function));
        if let Some(studies) = &ingredient.clinical_studies {
            out.push_str(&format!("**Clinical Studies:** {studies}\n\n"));
        }
        if let Some(trend) = &ingredient.market_trend_analysis {
            out.push_str(&format!("**Market Trend Analysis:** {trend}\n\n"));
        }
    }
}

fn render_summary(out: &mut String, summary: &ActionableSummary) {
    if summary.is_empty() {
        out.push_str("_The summary came back empty._\n");
        return;
    }

    for (heading, items) in [
        ("Key Selling Points", &summary.selling_points),
        ("Cautions & Considerations", &summary.cautions),
        ("Market Opportunities", &summary.market_opportunities),
        ("Suggested Next Steps", &summary.next_steps),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("### {heading}\n\n"));
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
        out.push('\n');
    }
}

// Tilde fences so backtick fences inside model output survive.
fn push_raw(out: &mut String, raw: &str) {
    out.push_str("~~~text\n");
    out.push_str(raw.trim_end());
    out.push_str("\n~~~\n");
}
